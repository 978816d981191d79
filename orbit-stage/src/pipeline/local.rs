//! Local-dispatch step: short-circuits messages targeted at this node.
//!
//! A message whose target is the local node never reaches the codec or the
//! transport: it is diverted straight into the inbound direction, so a local
//! invocation round-trips without ever being serialized.

use std::sync::Arc;

use async_trait::async_trait;

use super::{ContainerBody, MessageContainer, PipelineStep, StepOutcome};
use crate::net::NetSystem;

/// Outbound: diverts locally targeted messages inbound. Inbound:
/// pass-through.
pub struct LocalDispatchStep {
    net: Arc<NetSystem>,
}

impl LocalDispatchStep {
    /// Create the step.
    pub fn new(net: Arc<NetSystem>) -> Self {
        Self { net }
    }
}

#[async_trait]
impl PipelineStep for LocalDispatchStep {
    fn name(&self) -> &'static str {
        "local-dispatch"
    }

    async fn on_outbound(&self, container: MessageContainer) -> StepOutcome {
        let is_local = match &container.body {
            ContainerBody::Decoded(message) => message
                .target
                .as_ref()
                .and_then(|target| target.unicast())
                .is_some_and(|node| self.net.is_local(node)),
            ContainerBody::Encoded { .. } => false,
        };

        if is_local {
            tracing::trace!("short-circuiting locally targeted message");
            StepOutcome::DivertInbound(container)
        } else {
            StepOutcome::Continue(container)
        }
    }
}
