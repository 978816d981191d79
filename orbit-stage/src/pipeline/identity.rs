//! Identity step: stamps message id, source node, and send timestamp.

use std::sync::Arc;

use async_trait::async_trait;

use orbit_core::{Clock, OrbitError};

use super::{ContainerBody, MessageContainer, PipelineStep, StepOutcome};
use crate::net::NetSystem;

/// Outbound: fills `message_id`, `source`, and `sent_at` when absent.
/// Inbound: pass-through.
pub struct IdentityStep {
    net: Arc<NetSystem>,
    clock: Arc<dyn Clock>,
}

impl IdentityStep {
    /// Create the step.
    pub fn new(net: Arc<NetSystem>, clock: Arc<dyn Clock>) -> Self {
        Self { net, clock }
    }
}

#[async_trait]
impl PipelineStep for IdentityStep {
    fn name(&self) -> &'static str {
        "identity"
    }

    async fn on_outbound(&self, mut container: MessageContainer) -> StepOutcome {
        match &mut container.body {
            ContainerBody::Decoded(message) => {
                if message.message_id.is_none() {
                    message.message_id = Some(self.net.next_message_id());
                }
                if message.source.is_none() {
                    message.source = Some(self.net.local_identity());
                }
                message.sent_at = Some(self.clock.now());
                StepOutcome::Continue(container)
            }
            ContainerBody::Encoded { .. } => StepOutcome::Failed {
                container,
                error: OrbitError::invalid_state("encoded frame submitted outbound"),
            },
        }
    }
}
