//! Error types for the Orbit runtime core.

use crate::codec::CodecError;

/// Result alias used throughout the runtime.
pub type OrbitResult<T> = Result<T, OrbitError>;

/// Errors produced by the runtime core.
///
/// Propagation policy: errors on the outbound path settle the originating
/// [`Completion`](crate::Completion); errors on the inbound path travel back
/// to the caller node as a response of kind error; errors in background tasks
/// go to the stage's global error handler and never crash the stage.
#[derive(Debug, thiserror::Error)]
pub enum OrbitError {
    /// No capable host exists for the interface.
    #[error("no available node can host interface {interface}")]
    NoAvailableNode {
        /// Interface that could not be placed.
        interface: String,
    },

    /// A non-auto-activating interface has no live instance.
    #[error("no active addressable for {reference}")]
    NoActiveAddressable {
        /// Reference that had no activation.
        reference: String,
    },

    /// The instance's activation hook failed.
    #[error("activation of {reference} failed: {message}")]
    ActivationFailed {
        /// Reference whose activation failed.
        reference: String,
        /// Details from the activation hook.
        message: String,
    },

    /// The instance's deactivation hook failed.
    #[error("deactivation of {reference} failed: {message}")]
    DeactivationFailed {
        /// Reference whose deactivation failed.
        reference: String,
        /// Details from the deactivation hook.
        message: String,
    },

    /// A response was not received within the invocation timeout.
    #[error("response timed out after {millis} ms")]
    Timeout {
        /// The timeout that elapsed, in milliseconds.
        millis: u64,
    },

    /// A bounded queue rejected the message.
    #[error("{resource} full: capacity {capacity}")]
    CapacityExceeded {
        /// Which queue overflowed (pipeline or mailbox).
        resource: &'static str,
        /// Maximum capacity of the queue.
        capacity: usize,
    },

    /// The invocation arrived at a handler that is already deactivating.
    /// Callers typically retry, which re-places through the directory.
    #[error("addressable {reference} is deactivating")]
    Deactivating {
        /// Reference that is deactivating.
        reference: String,
    },

    /// Underlying transport failure.
    #[error("transport error: {message}")]
    Transport {
        /// Details about the transport failure.
        message: String,
    },

    /// Underlying directory store failure.
    #[error("directory error: {message}")]
    Directory {
        /// Details about the directory failure.
        message: String,
    },

    /// The operation was cancelled cooperatively.
    #[error("operation cancelled")]
    Cancelled,

    /// The addressable's method raised an application-level error.
    #[error("invocation failed: {message}")]
    Invocation {
        /// Details from the addressable method.
        message: String,
    },

    /// Message encoding or decoding failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A completion was dropped before anything settled it.
    #[error("completion dropped before being settled")]
    BrokenCompletion,

    /// An operation was attempted in a state that does not permit it.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Details about the state violation.
        message: String,
    },
}

impl OrbitError {
    /// Application-level invocation error with the given message.
    pub fn invocation(message: impl Into<String>) -> Self {
        OrbitError::Invocation {
            message: message.into(),
        }
    }

    /// Transport failure with the given message.
    pub fn transport(message: impl Into<String>) -> Self {
        OrbitError::Transport {
            message: message.into(),
        }
    }

    /// Directory failure with the given message.
    pub fn directory(message: impl Into<String>) -> Self {
        OrbitError::Directory {
            message: message.into(),
        }
    }

    /// State violation with the given message.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        OrbitError::InvalidState {
            message: message.into(),
        }
    }

    /// True for errors a caller can reasonably retry: the target was
    /// deactivating, a queue was momentarily full, or I/O failed transiently.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrbitError::Deactivating { .. }
                | OrbitError::CapacityExceeded { .. }
                | OrbitError::Transport { .. }
                | OrbitError::Directory { .. }
                | OrbitError::Timeout { .. }
        )
    }
}
