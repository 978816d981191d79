//! The staged message pipeline.
//!
//! Messages traverse an ordered chain of steps: outbound from the innermost
//! step (identity) toward the transport, inbound in mirror order. The driver
//! is a plain loop over step outcomes — steps are data to it, not a class
//! hierarchy. A step either passes the message on, terminates it, diverts it
//! into the inbound direction (the local-dispatch short-circuit), or fails
//! it.
//!
//! Standard outbound order:
//!
//! 1. [`IdentityStep`] — stamp message id, source, timestamp
//! 2. [`TrackingStep`] — register the request's completion for correlation
//! 3. [`RoutingStep`] — resolve the target node
//! 4. [`LocalDispatchStep`] — short-circuit local targets, skipping the codec
//! 5. [`CodecStep`] — encode to a frame
//! 6. [`TransportStep`] — hand the frame to the carrier
//!
//! Admission is bounded: each message occupies one in-flight slot for its
//! full traversal (a local-dispatch divert included); when all
//! `pipeline_buffer_count` slots are busy, submission fails with
//! `CapacityExceeded`.

mod codec;
mod identity;
mod local;
mod routing;
mod tracking;
mod transport;

pub use codec::CodecStep;
pub use identity::IdentityStep;
pub use local::LocalDispatchStep;
pub use routing::RoutingStep;
pub use tracking::TrackingStep;
pub use transport::TransportStep;

use std::sync::{Arc, OnceLock, Weak};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use orbit_core::{
    Completion, Message, MessageContent, NetTarget, OrbitError, OrbitResult, RemoteError,
};

use crate::execution::ExecutionSystem;
use crate::net::NetSystem;
use crate::pools::{ErrorHandler, Pools};
use crate::responses::ResponseTracker;

/// Payload state of a message in the pipeline.
#[derive(Debug)]
pub enum ContainerBody {
    /// A decoded message (everything inside the codec step).
    Decoded(Message),
    /// An encoded frame (between codec and transport).
    Encoded {
        /// Destination, present on the outbound side.
        to: Option<NetTarget>,
        /// The encoded message.
        frame: Vec<u8>,
        /// Message id of a locally originated request, kept so a transport
        /// failure can still settle the tracked completion.
        request_id: Option<u64>,
    },
}

/// The unit the pipeline driver moves between steps.
#[derive(Debug)]
pub struct MessageContainer {
    /// Payload state.
    pub body: ContainerBody,
    /// The originating completion, carried until the tracking step registers
    /// it. `None` for responses and remote-origin traffic.
    pub completion: Option<Completion>,
}

impl MessageContainer {
    /// An outbound request paired with its completion.
    pub fn outbound_request(message: Message, completion: Completion) -> Self {
        Self {
            body: ContainerBody::Decoded(message),
            completion: Some(completion),
        }
    }

    /// An outbound message with no completion (responses).
    pub fn outbound(message: Message) -> Self {
        Self {
            body: ContainerBody::Decoded(message),
            completion: None,
        }
    }

    /// An inbound frame fresh off the transport.
    pub fn inbound_frame(frame: Vec<u8>) -> Self {
        Self {
            body: ContainerBody::Encoded {
                to: None,
                frame,
                request_id: None,
            },
            completion: None,
        }
    }
}

/// What a step did with the message.
#[derive(Debug)]
pub enum StepOutcome {
    /// Pass the (possibly transformed) message to the next step.
    Continue(MessageContainer),
    /// Switch to the inbound direction at the previous step — the
    /// local-dispatch short-circuit.
    DivertInbound(MessageContainer),
    /// The message was absorbed (sent, settled, or dropped).
    Done,
    /// Processing failed; the driver settles or reports the error.
    Failed {
        /// The message as it stood when the failure occurred.
        container: MessageContainer,
        /// What went wrong.
        error: OrbitError,
    },
}

/// One stage of the pipeline. Both directions default to pass-through.
#[async_trait]
pub trait PipelineStep: Send + Sync + 'static {
    /// Step name, for logs.
    fn name(&self) -> &'static str;

    /// Process a message moving toward the transport.
    async fn on_outbound(&self, container: MessageContainer) -> StepOutcome {
        StepOutcome::Continue(container)
    }

    /// Process a message moving toward execution.
    async fn on_inbound(&self, container: MessageContainer) -> StepOutcome {
        StepOutcome::Continue(container)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Outbound,
    Inbound,
}

/// The staged pipeline driver.
pub struct Pipeline {
    steps: Vec<Arc<dyn PipelineStep>>,
    permits: Arc<Semaphore>,
    buffer_count: usize,
    closed: AtomicBool,
    execution: OnceLock<Weak<ExecutionSystem>>,
    tracker: Arc<ResponseTracker>,
    net: Arc<NetSystem>,
    pools: Arc<Pools>,
    error_handler: ErrorHandler,
}

impl Pipeline {
    /// Build a pipeline over an ordered step chain (outbound order).
    pub fn new(
        steps: Vec<Arc<dyn PipelineStep>>,
        buffer_count: usize,
        tracker: Arc<ResponseTracker>,
        net: Arc<NetSystem>,
        pools: Arc<Pools>,
        error_handler: ErrorHandler,
    ) -> Arc<Self> {
        Arc::new(Self {
            steps,
            permits: Arc::new(Semaphore::new(buffer_count)),
            buffer_count,
            closed: AtomicBool::new(false),
            execution: OnceLock::new(),
            tracker,
            net,
            pools,
            error_handler,
        })
    }

    /// Late-bind the execution sink (set once during stage assembly).
    pub fn bind_execution(&self, execution: Weak<ExecutionSystem>) {
        let _ = self.execution.set(execution);
    }

    /// Stop admitting messages. In-flight traversals complete.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Submit a message for outbound processing.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` when all in-flight slots are busy, `InvalidState`
    /// when the pipeline is closed. Either way the carried completion (if
    /// any) has been settled with the same error kind before this returns.
    pub async fn submit_outbound(self: &Arc<Self>, container: MessageContainer) -> OrbitResult<()> {
        self.submit(Direction::Outbound, container).await
    }

    /// Submit a frame received from the transport for inbound processing.
    ///
    /// # Errors
    ///
    /// Same admission errors as [`Pipeline::submit_outbound`]; a rejected
    /// inbound frame is dropped (at-most-once delivery).
    pub async fn submit_inbound(self: &Arc<Self>, container: MessageContainer) -> OrbitResult<()> {
        self.submit(Direction::Inbound, container).await
    }

    async fn submit(
        self: &Arc<Self>,
        direction: Direction,
        mut container: MessageContainer,
    ) -> OrbitResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            if let Some(completion) = container.completion.take() {
                completion.fail(OrbitError::invalid_state("pipeline is stopped"));
            }
            return Err(OrbitError::invalid_state("pipeline is stopped"));
        }

        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                if let Some(completion) = container.completion.take() {
                    completion.fail(OrbitError::CapacityExceeded {
                        resource: "pipeline",
                        capacity: self.buffer_count,
                    });
                }
                return Err(OrbitError::CapacityExceeded {
                    resource: "pipeline",
                    capacity: self.buffer_count,
                });
            }
        };

        let start = match direction {
            Direction::Outbound => 0,
            Direction::Inbound => self.steps.len() - 1,
        };
        self.traverse(direction, start, container).await;
        drop(permit);
        Ok(())
    }

    async fn traverse(
        self: &Arc<Self>,
        mut direction: Direction,
        mut index: usize,
        mut container: MessageContainer,
    ) {
        loop {
            let step = &self.steps[index];
            let outcome = match direction {
                Direction::Outbound => step.on_outbound(container).await,
                Direction::Inbound => step.on_inbound(container).await,
            };

            container = match outcome {
                StepOutcome::Continue(next) => next,
                StepOutcome::DivertInbound(next) => {
                    direction = Direction::Inbound;
                    next
                }
                StepOutcome::Done => return,
                StepOutcome::Failed { container, error } => {
                    tracing::debug!(step = step.name(), %error, "pipeline step failed");
                    self.fail(container, error);
                    return;
                }
            };

            match direction {
                Direction::Outbound => {
                    index += 1;
                    if index == self.steps.len() {
                        self.fail(
                            container,
                            OrbitError::invalid_state("message ran off the outbound pipeline"),
                        );
                        return;
                    }
                }
                Direction::Inbound => {
                    if index == 0 {
                        self.deliver(container);
                        return;
                    }
                    index -= 1;
                }
            }
        }
    }

    /// Hand a fully processed inbound message to the execution system.
    fn deliver(&self, container: MessageContainer) {
        let MessageContainer { body, completion } = container;
        if let Some(completion) = completion {
            completion.fail(OrbitError::invalid_state(
                "request completion survived to the inbound end",
            ));
            return;
        }
        let message = match body {
            ContainerBody::Decoded(message) => message,
            ContainerBody::Encoded { .. } => {
                (self.error_handler)(&OrbitError::invalid_state(
                    "encoded frame reached the execution sink",
                ));
                return;
            }
        };
        let execution = self.execution.get().and_then(Weak::upgrade);
        match execution {
            Some(execution) => {
                if let Err(error) = execution.accept(message) {
                    tracing::warn!(%error, "execution rejected inbound message");
                    (self.error_handler)(&error);
                }
            }
            None => {
                tracing::debug!("execution system gone, dropping inbound message");
            }
        }
    }

    /// Resolve a failed message: settle its completion, settle its tracked
    /// id, answer the remote caller, or report to the error handler.
    fn fail(self: &Arc<Self>, container: MessageContainer, error: OrbitError) {
        let MessageContainer { body, completion } = container;
        if let Some(completion) = completion {
            completion.fail(error);
            return;
        }

        match body {
            ContainerBody::Decoded(message) => match &message.content {
                MessageContent::InvocationRequest(_) => {
                    match (message.message_id, message.source.clone()) {
                        (Some(id), Some(source)) if !self.net.is_local(&source) => {
                            // Remote caller: turn the failure into an error
                            // response. A new submission, so a fresh slot.
                            let response =
                                Message::response_error(id, RemoteError::from(&error), source);
                            let pipeline = Arc::clone(self);
                            self.pools.spawn_io("error-response", async move {
                                pipeline
                                    .submit_outbound(MessageContainer::outbound(response))
                                    .await
                            });
                        }
                        (Some(id), _) => {
                            // Locally originated and already tracked.
                            if !self.tracker.settle(id, Err(error)) {
                                tracing::debug!(
                                    message_id = id,
                                    "failed request was no longer tracked"
                                );
                            }
                        }
                        _ => (self.error_handler)(&error),
                    }
                }
                _ => {
                    tracing::warn!(%error, "dropping failed response message");
                    (self.error_handler)(&error);
                }
            },
            ContainerBody::Encoded { request_id, .. } => match request_id {
                Some(id) => {
                    if !self.tracker.settle(id, Err(error)) {
                        tracing::debug!(message_id = id, "failed frame was no longer tracked");
                    }
                }
                None => (self.error_handler)(&error),
            },
        }
    }
}
