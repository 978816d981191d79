//! Transport step: hands encoded frames to the message carrier.

use std::sync::Arc;

use async_trait::async_trait;

use orbit_core::{MessageTransport, NetTarget, OrbitError};

use super::{ContainerBody, MessageContainer, PipelineStep, StepOutcome};

/// Outbound terminal: sends the frame. Inbound entry: pass-through.
pub struct TransportStep {
    transport: Arc<dyn MessageTransport>,
}

impl TransportStep {
    /// Create the step over a transport.
    pub fn new(transport: Arc<dyn MessageTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl PipelineStep for TransportStep {
    fn name(&self) -> &'static str {
        "transport"
    }

    async fn on_outbound(&self, container: MessageContainer) -> StepOutcome {
        let MessageContainer { body, completion } = container;
        let (to, frame, request_id) = match body {
            ContainerBody::Encoded {
                to,
                frame,
                request_id,
            } => (to, frame, request_id),
            ContainerBody::Decoded(_) => {
                return StepOutcome::Failed {
                    container: MessageContainer { body, completion },
                    error: OrbitError::invalid_state("unencoded message reached the transport"),
                };
            }
        };

        let rebuild = |to: Option<NetTarget>, frame: Vec<u8>| MessageContainer {
            body: ContainerBody::Encoded {
                to,
                frame,
                request_id,
            },
            completion,
        };

        match to {
            Some(NetTarget::Unicast(node)) => {
                match self.transport.send(&node, frame).await {
                    Ok(()) => StepOutcome::Done,
                    Err(error) => StepOutcome::Failed {
                        container: rebuild(Some(NetTarget::Unicast(node)), Vec::new()),
                        error,
                    },
                }
            }
            Some(NetTarget::Multicast(nodes)) => {
                // Best-effort fan-out; individual failures are logged.
                for node in &nodes {
                    if let Err(error) = self.transport.send(node, frame.clone()).await {
                        tracing::warn!(%node, %error, "multicast leg failed");
                    }
                }
                StepOutcome::Done
            }
            other => StepOutcome::Failed {
                container: rebuild(other, frame),
                error: OrbitError::invalid_state("message reached the transport without a target"),
            },
        }
    }
}
