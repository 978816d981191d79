//! Serialization step: encodes outbound messages, decodes inbound frames.

use async_trait::async_trait;

use orbit_core::{Message, MessageCodec, MessageContent, OrbitError};

use super::{ContainerBody, MessageContainer, PipelineStep, StepOutcome};

/// Outbound: `Decoded → Encoded`. Inbound: `Encoded → Decoded`.
pub struct CodecStep<C: MessageCodec> {
    codec: C,
}

impl<C: MessageCodec> CodecStep<C> {
    /// Create the step over a codec instance.
    pub fn new(codec: C) -> Self {
        Self { codec }
    }
}

#[async_trait]
impl<C: MessageCodec> PipelineStep for CodecStep<C> {
    fn name(&self) -> &'static str {
        "serialization"
    }

    async fn on_outbound(&self, container: MessageContainer) -> StepOutcome {
        let MessageContainer { body, completion } = container;
        let message = match body {
            ContainerBody::Decoded(message) => message,
            ContainerBody::Encoded { .. } => {
                return StepOutcome::Failed {
                    container: MessageContainer { body, completion },
                    error: OrbitError::invalid_state("frame encoded twice"),
                };
            }
        };

        // Keep the request id around so a downstream transport failure can
        // still settle the tracked completion.
        let request_id = match &message.content {
            MessageContent::InvocationRequest(_) => message.message_id,
            _ => None,
        };

        match self.codec.encode(&message) {
            Ok(frame) => StepOutcome::Continue(MessageContainer {
                body: ContainerBody::Encoded {
                    to: message.target.clone(),
                    frame,
                    request_id,
                },
                completion,
            }),
            Err(error) => StepOutcome::Failed {
                container: MessageContainer {
                    body: ContainerBody::Decoded(message),
                    completion,
                },
                error: error.into(),
            },
        }
    }

    async fn on_inbound(&self, container: MessageContainer) -> StepOutcome {
        let MessageContainer { body, completion } = container;
        let (to, frame, request_id) = match body {
            ContainerBody::Encoded {
                to,
                frame,
                request_id,
            } => (to, frame, request_id),
            ContainerBody::Decoded(_) => {
                // Already decoded: the local-dispatch divert enters below
                // this step, so this only happens on misuse.
                return StepOutcome::Continue(MessageContainer { body, completion });
            }
        };

        match self.codec.decode::<Message>(&frame) {
            Ok(message) => StepOutcome::Continue(MessageContainer {
                body: ContainerBody::Decoded(message),
                completion,
            }),
            Err(error) => StepOutcome::Failed {
                container: MessageContainer {
                    body: ContainerBody::Encoded {
                        to,
                        frame,
                        request_id,
                    },
                    completion,
                },
                error: error.into(),
            },
        }
    }
}
