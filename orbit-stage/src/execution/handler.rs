//! Per-addressable execution handler: the serialized worker loop.
//!
//! One handler owns one addressable instance. The instance never escapes the
//! handler's worker task, so invocations on it are serialized by
//! construction: the loop dequeues one mailbox entry at a time, runs it to
//! completion, and only then looks at the next. States move forward only:
//!
//! ```text
//! CREATED → ACTIVATING → ACTIVE ↔ INVOKING → DEACTIVATING → DEAD
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use orbit_core::{
    Addressable, AddressableInterfaceDefinition, AddressableInvocation, AddressableReference,
    Clock, Completion, OrbitError, OrbitResult,
};

use crate::directory::DirectoryFacade;
use crate::pools::ErrorHandler;

/// Lifecycle state of a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandlerState {
    /// Inserted into the active map, worker not yet running.
    Created = 0,
    /// Running the activation hook.
    Activating = 1,
    /// Parked, waiting for mail.
    Active = 2,
    /// Running one invocation.
    Invoking = 3,
    /// Draining the mailbox and running the deactivation hook.
    Deactivating = 4,
    /// Gone; the reference may re-activate as a fresh handler.
    Dead = 5,
}

impl HandlerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => HandlerState::Created,
            1 => HandlerState::Activating,
            2 => HandlerState::Active,
            3 => HandlerState::Invoking,
            4 => HandlerState::Deactivating,
            _ => HandlerState::Dead,
        }
    }
}

impl std::fmt::Display for HandlerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            HandlerState::Created => "created",
            HandlerState::Activating => "activating",
            HandlerState::Active => "active",
            HandlerState::Invoking => "invoking",
            HandlerState::Deactivating => "deactivating",
            HandlerState::Dead => "dead",
        };
        f.write_str(label)
    }
}

/// One queued invocation with its completion.
pub(crate) struct MailboxEntry {
    pub invocation: AddressableInvocation,
    pub completion: Completion,
}

/// State shared between the worker loop, the execution map, and the tick
/// sweep. The loop writes `state`/`last_activity`; the sweep only reads them
/// and fires the deactivation token.
pub(crate) struct HandlerShared {
    pub reference: AddressableReference,
    pub definition: Arc<AddressableInterfaceDefinition>,
    /// Externally managed singletons skip lifecycle hooks and idle reaping.
    pub externally_managed: bool,
    state: AtomicU8,
    last_activity: AtomicU64,
    pub deactivate: CancellationToken,
}

impl HandlerShared {
    pub(crate) fn new(
        reference: AddressableReference,
        definition: Arc<AddressableInterfaceDefinition>,
        externally_managed: bool,
        now: u64,
    ) -> Self {
        Self {
            reference,
            definition,
            externally_managed,
            state: AtomicU8::new(HandlerState::Created as u8),
            last_activity: AtomicU64::new(now),
            deactivate: CancellationToken::new(),
        }
    }

    pub(crate) fn state(&self) -> HandlerState {
        HandlerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: HandlerState) {
        tracing::trace!(reference = %self.reference, %state, "handler state");
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::SeqCst)
    }

    fn touch(&self, now: u64) {
        self.last_activity.store(now, Ordering::SeqCst);
    }
}

/// The instance a new handler starts from.
pub(crate) enum InstanceSource {
    /// Fresh instance per activation.
    Factory(orbit_core::AddressableFactory),
    /// Pre-built singleton with externally managed lifecycle.
    Singleton(Box<dyn Addressable>),
}

/// Map entry for one active handler.
pub(crate) struct ExecutionHandle {
    pub mailbox: mpsc::Sender<MailboxEntry>,
    pub shared: Arc<HandlerShared>,
    pub join: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ExecutionHandle {
    /// Enqueue an invocation, settling the completion on overflow or when
    /// the handler is already deactivating.
    pub(crate) fn enqueue(
        &self,
        invocation: AddressableInvocation,
        completion: Completion,
        capacity: usize,
    ) {
        match self.mailbox.try_send(MailboxEntry {
            invocation,
            completion,
        }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(entry)) => {
                tracing::debug!(reference = %self.shared.reference, "mailbox overflow");
                entry.completion.fail(OrbitError::CapacityExceeded {
                    resource: "mailbox",
                    capacity,
                });
            }
            Err(mpsc::error::TrySendError::Closed(entry)) => {
                entry.completion.fail(OrbitError::Deactivating {
                    reference: self.shared.reference.to_string(),
                });
            }
        }
    }
}

/// Everything the worker loop needs besides its mailbox.
pub(crate) struct WorkerContext {
    pub shared: Arc<HandlerShared>,
    pub active: Arc<DashMap<AddressableReference, ExecutionHandle>>,
    pub directory: Arc<DirectoryFacade>,
    pub clock: Arc<dyn Clock>,
    pub error_handler: ErrorHandler,
}

/// The serialized worker loop for one handler.
pub(crate) async fn run_handler(
    ctx: WorkerContext,
    source: InstanceSource,
    mut mailbox: mpsc::Receiver<MailboxEntry>,
) -> OrbitResult<()> {
    let shared = Arc::clone(&ctx.shared);
    let reference = shared.reference.clone();

    let mut instance = match source {
        InstanceSource::Factory(factory) => factory(),
        InstanceSource::Singleton(instance) => instance,
    };

    // Activation.
    shared.set_state(HandlerState::Activating);
    if !shared.externally_managed {
        if let Err(error) = instance.on_activate().await {
            return fail_activation(&ctx, &reference, &mut mailbox, error).await;
        }
    }
    shared.set_state(HandlerState::Active);
    shared.touch(ctx.clock.now());
    tracing::debug!(%reference, "addressable activated");

    // Serve invocations until signalled. The deactivation signal is only
    // observed between invocations, so an in-flight call finishes first.
    loop {
        let entry = tokio::select! {
            biased;
            _ = shared.deactivate.cancelled() => break,
            entry = mailbox.recv() => match entry {
                Some(entry) => entry,
                None => break,
            },
        };

        shared.set_state(HandlerState::Invoking);
        let MailboxEntry {
            invocation,
            completion,
        } = entry;
        tracing::trace!(%reference, method = %invocation.method, "invoking");
        let result = instance.invoke(&invocation.method, invocation.args).await;
        if let Err(error) = &result {
            tracing::debug!(%reference, method = %invocation.method, %error, "invocation failed");
        }
        completion.settle(result);
        shared.touch(ctx.clock.now());
        shared.set_state(HandlerState::Active);
    }

    // Deactivation.
    shared.set_state(HandlerState::Deactivating);
    mailbox.close();
    while let Ok(entry) = mailbox.try_recv() {
        entry.completion.fail(OrbitError::Deactivating {
            reference: reference.to_string(),
        });
    }

    if !shared.externally_managed {
        if let Err(error) = instance.on_deactivate().await {
            let wrapped = OrbitError::DeactivationFailed {
                reference: reference.to_string(),
                message: error.to_string(),
            };
            tracing::warn!(%reference, %error, "deactivation hook failed");
            (ctx.error_handler)(&wrapped);
        }
    }

    shared.set_state(HandlerState::Dead);
    release_placement(&ctx, &reference).await;
    ctx.active.remove(&reference);
    tracing::debug!(%reference, "addressable deactivated");
    Ok(())
}

async fn fail_activation(
    ctx: &WorkerContext,
    reference: &AddressableReference,
    mailbox: &mut mpsc::Receiver<MailboxEntry>,
    error: OrbitError,
) -> OrbitResult<()> {
    let message = error.to_string();
    tracing::warn!(%reference, %error, "activation hook failed");
    ctx.shared.set_state(HandlerState::Dead);

    mailbox.close();
    while let Ok(entry) = mailbox.try_recv() {
        entry.completion.fail(OrbitError::ActivationFailed {
            reference: reference.to_string(),
            message: message.clone(),
        });
    }

    release_placement(ctx, reference).await;
    ctx.active.remove(reference);
    Err(OrbitError::ActivationFailed {
        reference: reference.to_string(),
        message,
    })
}

/// Best-effort removal of this node's placement record.
async fn release_placement(ctx: &WorkerContext, reference: &AddressableReference) {
    if !ctx.shared.definition.routing.persistent {
        return;
    }
    if let Err(error) = ctx.directory.remove_if_local(reference).await {
        tracing::warn!(%reference, %error, "failed to release placement");
        (ctx.error_handler)(&error);
    }
}
