//! The pipeline payload: invocations, responses, and the wire error.
//!
//! A [`Message`] is what traverses the staged pipeline in both directions.
//! Requests carry an [`AddressableInvocation`]; responses correlate back to
//! the request's message id and carry either a value or a [`RemoteError`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OrbitError;
use crate::types::{AddressableReference, NetTarget, NodeIdentity};

/// Header carrying a per-call timeout override, in milliseconds.
///
/// Resolution order for a request's response deadline: this header, then the
/// interface definition's timeout, then the stage's `message_timeout`.
pub const TIMEOUT_OVERRIDE_HEADER: &str = "invocation-timeout-millis";

/// One method call on an addressable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressableInvocation {
    /// The addressable being invoked.
    pub reference: AddressableReference,
    /// Method name on the target interface.
    pub method: String,
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Opaque per-call metadata.
    pub headers: BTreeMap<String, String>,
}

impl AddressableInvocation {
    /// Create an invocation with empty headers.
    pub fn new(
        reference: AddressableReference,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            reference,
            method: method.into(),
            args,
            headers: BTreeMap::new(),
        }
    }

    /// Attach a header, returning the invocation for chaining.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Payload variants carried by a [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageContent {
    /// A request to invoke a method on an addressable.
    InvocationRequest(AddressableInvocation),
    /// Successful response, correlated by the request's message id.
    ResponseValue {
        /// Message id of the request being answered.
        id: u64,
        /// The value the invocation returned.
        value: Value,
    },
    /// Error response, correlated by the request's message id.
    ResponseError {
        /// Message id of the request being answered.
        id: u64,
        /// The error the invocation produced.
        error: RemoteError,
    },
}

/// The unit flowing through the message pipeline.
///
/// `message_id`, `source`, and `sent_at` start empty and are stamped by the
/// pipeline's identity step; `target` is filled by routing when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Per-node-unique id, stamped on the sending node.
    pub message_id: Option<u64>,
    /// Node the message originated from.
    pub source: Option<NodeIdentity>,
    /// Node(s) the message is headed to.
    pub target: Option<NetTarget>,
    /// Millisecond timestamp (sender's clock) stamped at send.
    pub sent_at: Option<u64>,
    /// The payload.
    pub content: MessageContent,
}

impl Message {
    /// Build an unstamped request message.
    pub fn request(invocation: AddressableInvocation) -> Self {
        Self {
            message_id: None,
            source: None,
            target: None,
            sent_at: None,
            content: MessageContent::InvocationRequest(invocation),
        }
    }

    /// Build an unstamped successful response to message `id`, addressed to
    /// the requesting node.
    pub fn response_value(id: u64, value: Value, to: NodeIdentity) -> Self {
        Self {
            message_id: None,
            source: None,
            target: Some(NetTarget::Unicast(to)),
            sent_at: None,
            content: MessageContent::ResponseValue { id, value },
        }
    }

    /// Build an unstamped error response to message `id`, addressed to the
    /// requesting node.
    pub fn response_error(id: u64, error: RemoteError, to: NodeIdentity) -> Self {
        Self {
            message_id: None,
            source: None,
            target: Some(NetTarget::Unicast(to)),
            sent_at: None,
            content: MessageContent::ResponseError { id, error },
        }
    }

    /// The invocation reference, when this message is a request.
    pub fn reference(&self) -> Option<&AddressableReference> {
        match &self.content {
            MessageContent::InvocationRequest(invocation) => Some(&invocation.reference),
            _ => None,
        }
    }
}

/// Error payload of a [`MessageContent::ResponseError`].
///
/// Only failure kinds that are meaningful to a remote caller cross the wire;
/// everything else collapses into [`RemoteError::Internal`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RemoteError {
    /// The target interface does not auto-activate and had no live instance.
    #[error("no active addressable: {reference}")]
    NoActiveAddressable {
        /// Display form of the reference.
        reference: String,
    },
    /// The activation hook failed on the hosting node.
    #[error("activation failed: {message}")]
    ActivationFailed {
        /// Details from the hosting node.
        message: String,
    },
    /// The target handler was deactivating; retrying re-places the actor.
    #[error("addressable is deactivating: {reference}")]
    Deactivating {
        /// Display form of the reference.
        reference: String,
    },
    /// A bounded queue on the hosting node rejected the invocation.
    #[error("capacity exceeded on hosting node")]
    CapacityExceeded,
    /// The addressable's method raised an application-level error.
    #[error("invocation failed: {message}")]
    Invocation {
        /// Details from the method.
        message: String,
    },
    /// Any other failure on the hosting node.
    #[error("remote error: {message}")]
    Internal {
        /// Details from the hosting node.
        message: String,
    },
}

impl From<&OrbitError> for RemoteError {
    fn from(error: &OrbitError) -> Self {
        match error {
            OrbitError::NoActiveAddressable { reference } => RemoteError::NoActiveAddressable {
                reference: reference.clone(),
            },
            OrbitError::ActivationFailed { message, .. } => RemoteError::ActivationFailed {
                message: message.clone(),
            },
            OrbitError::Deactivating { reference } => RemoteError::Deactivating {
                reference: reference.clone(),
            },
            OrbitError::CapacityExceeded { .. } => RemoteError::CapacityExceeded,
            OrbitError::Invocation { message } => RemoteError::Invocation {
                message: message.clone(),
            },
            other => RemoteError::Internal {
                message: other.to_string(),
            },
        }
    }
}

impl From<RemoteError> for OrbitError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::NoActiveAddressable { reference } => {
                OrbitError::NoActiveAddressable { reference }
            }
            RemoteError::ActivationFailed { message } => OrbitError::ActivationFailed {
                reference: String::new(),
                message,
            },
            RemoteError::Deactivating { reference } => OrbitError::Deactivating { reference },
            RemoteError::CapacityExceeded => OrbitError::CapacityExceeded {
                resource: "remote queue",
                capacity: 0,
            },
            RemoteError::Invocation { message } => OrbitError::Invocation { message },
            RemoteError::Internal { message } => OrbitError::Invocation { message },
        }
    }
}
