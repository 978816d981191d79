//! Response-tracking step: registers outbound requests, settles inbound
//! responses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use orbit_core::{MessageContent, OrbitError, TIMEOUT_OVERRIDE_HEADER};

use super::{ContainerBody, MessageContainer, PipelineStep, StepOutcome};
use crate::registry::AddressableRegistry;
use crate::responses::ResponseTracker;

/// Outbound: for a request, takes the carried completion and registers it
/// under the message id with the resolved timeout. Inbound: responses settle
/// their tracked id and terminate here; requests pass through to execution.
pub struct TrackingStep {
    tracker: Arc<ResponseTracker>,
    registry: Arc<AddressableRegistry>,
    default_timeout: Duration,
}

impl TrackingStep {
    /// Create the step.
    pub fn new(
        tracker: Arc<ResponseTracker>,
        registry: Arc<AddressableRegistry>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            tracker,
            registry,
            default_timeout,
        }
    }

    /// Timeout resolution: per-call header, then interface definition, then
    /// the stage default.
    fn resolve_timeout(&self, invocation: &orbit_core::AddressableInvocation) -> Duration {
        if let Some(raw) = invocation.headers.get(TIMEOUT_OVERRIDE_HEADER) {
            if let Ok(millis) = raw.parse::<u64>() {
                return Duration::from_millis(millis);
            }
            tracing::warn!(header = %raw, "ignoring unparseable timeout override");
        }
        self.registry
            .definition(&invocation.reference.interface)
            .and_then(|definition| definition.timeout)
            .unwrap_or(self.default_timeout)
    }
}

#[async_trait]
impl PipelineStep for TrackingStep {
    fn name(&self) -> &'static str {
        "response-tracking"
    }

    async fn on_outbound(&self, mut container: MessageContainer) -> StepOutcome {
        let ContainerBody::Decoded(message) = &container.body else {
            return StepOutcome::Failed {
                container,
                error: OrbitError::invalid_state("encoded frame before the codec step"),
            };
        };

        let MessageContent::InvocationRequest(invocation) = &message.content else {
            // Responses are not tracked.
            return StepOutcome::Continue(container);
        };

        let Some(message_id) = message.message_id else {
            return StepOutcome::Failed {
                container,
                error: OrbitError::invalid_state("request reached tracking without an id"),
            };
        };
        let Some(completion) = container.completion.take() else {
            return StepOutcome::Failed {
                container,
                error: OrbitError::invalid_state("request reached tracking without a completion"),
            };
        };

        let timeout = self.resolve_timeout(invocation);
        match self.tracker.track(message_id, completion, timeout) {
            Ok(()) => StepOutcome::Continue(container),
            Err(error) => {
                // The completion was settled inside `track`; absorb.
                tracing::warn!(message_id, %error, "dropping request with duplicate id");
                StepOutcome::Done
            }
        }
    }

    async fn on_inbound(&self, container: MessageContainer) -> StepOutcome {
        let ContainerBody::Decoded(message) = &container.body else {
            return StepOutcome::Failed {
                container,
                error: OrbitError::invalid_state("encoded frame past the codec step"),
            };
        };

        match &message.content {
            MessageContent::ResponseValue { id, value } => {
                self.tracker.settle(*id, Ok(value.clone()));
                StepOutcome::Done
            }
            MessageContent::ResponseError { id, error } => {
                self.tracker.settle(*id, Err(error.clone().into()));
                StepOutcome::Done
            }
            MessageContent::InvocationRequest(_) => StepOutcome::Continue(container),
        }
    }
}
