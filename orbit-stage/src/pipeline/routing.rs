//! Routing step: resolves the target node for outbound messages.

use std::sync::Arc;

use async_trait::async_trait;

use orbit_core::OrbitError;

use super::{ContainerBody, MessageContainer, PipelineStep, StepOutcome};
use crate::router::Router;

/// Outbound: passes explicit unicast targets through, otherwise asks the
/// [`Router`] for a placement. Inbound: pass-through.
pub struct RoutingStep {
    router: Arc<Router>,
}

impl RoutingStep {
    /// Create the step.
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl PipelineStep for RoutingStep {
    fn name(&self) -> &'static str {
        "routing"
    }

    async fn on_outbound(&self, mut container: MessageContainer) -> StepOutcome {
        let ContainerBody::Decoded(message) = &mut container.body else {
            return StepOutcome::Failed {
                container,
                error: OrbitError::invalid_state("encoded frame before the codec step"),
            };
        };

        if message.target.is_some() {
            return StepOutcome::Continue(container);
        }

        let Some(reference) = message.reference().cloned() else {
            return StepOutcome::Failed {
                container,
                error: OrbitError::invalid_state("untargeted non-request message"),
            };
        };

        match self.router.target_for(&reference).await {
            Ok(target) => {
                let ContainerBody::Decoded(message) = &mut container.body else {
                    unreachable!("body variant checked above");
                };
                message.target = Some(target);
                StepOutcome::Continue(container)
            }
            Err(error) => StepOutcome::Failed { container, error },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DirectoryFacade;
    use crate::net::NetSystem;
    use crate::registry::AddressableRegistry;
    use orbit_core::{
        AddressableDirectory, AddressableInvocation, AddressableReference,
        InMemoryAddressableDirectory, InMemoryNodeDirectory, InterfaceId, Key, Message, NetTarget,
        NodeDirectory, NodeIdentity, NodeMode,
    };

    async fn step_with_placement(reference: &AddressableReference, node: &str) -> RoutingStep {
        let backend = Arc::new(InMemoryAddressableDirectory::new());
        backend
            .put(reference, &NetTarget::Unicast(NodeIdentity::new(node)))
            .await
            .expect("put");

        let net = Arc::new(NetSystem::new(
            "orbit".to_string(),
            NodeIdentity::new("local"),
            NodeMode::Host,
        ));
        let registry = Arc::new(AddressableRegistry::new());
        let facade = Arc::new(DirectoryFacade::new(
            backend as Arc<dyn AddressableDirectory>,
            NodeIdentity::new("local"),
        ));
        let nodes = Arc::new(InMemoryNodeDirectory::new());
        RoutingStep::new(Arc::new(Router::new(
            net,
            registry,
            facade,
            nodes as Arc<dyn NodeDirectory>,
        )))
    }

    fn request(reference: &AddressableReference) -> Message {
        let mut message = Message::request(AddressableInvocation::new(
            reference.clone(),
            "greet",
            Vec::new(),
        ));
        message.message_id = Some(1);
        message.source = Some(NodeIdentity::new("local"));
        message
    }

    #[tokio::test]
    async fn test_populates_target_from_directory() {
        let reference = AddressableReference::new(InterfaceId::new("greeter"), Key::NoKey);
        let step = step_with_placement(&reference, "n2").await;

        let outcome = step
            .on_outbound(MessageContainer::outbound(request(&reference)))
            .await;
        let StepOutcome::Continue(container) = outcome else {
            panic!("expected continue");
        };
        let ContainerBody::Decoded(message) = container.body else {
            panic!("expected decoded body");
        };
        assert_eq!(
            message.target,
            Some(NetTarget::Unicast(NodeIdentity::new("n2")))
        );
    }

    #[tokio::test]
    async fn test_explicit_target_passes_through() {
        let reference = AddressableReference::new(InterfaceId::new("greeter"), Key::NoKey);
        let step = step_with_placement(&reference, "n2").await;

        let mut message = request(&reference);
        message.target = Some(NetTarget::Unicast(NodeIdentity::new("pinned")));
        let outcome = step.on_outbound(MessageContainer::outbound(message)).await;
        let StepOutcome::Continue(container) = outcome else {
            panic!("expected continue");
        };
        let ContainerBody::Decoded(message) = container.body else {
            panic!("expected decoded body");
        };
        assert_eq!(
            message.target,
            Some(NetTarget::Unicast(NodeIdentity::new("pinned")))
        );
    }

    #[tokio::test]
    async fn test_unroutable_request_fails() {
        let reference = AddressableReference::new(InterfaceId::new("greeter"), Key::NoKey);
        let step = step_with_placement(&reference, "n2").await;

        let other = AddressableReference::new(InterfaceId::new("unknown"), Key::NoKey);
        let outcome = step
            .on_outbound(MessageContainer::outbound(request(&other)))
            .await;
        assert!(matches!(
            outcome,
            StepOutcome::Failed {
                error: OrbitError::NoAvailableNode { .. },
                ..
            }
        ));
    }
}
