//! Client proxies: the exposed invocation surface.
//!
//! A proxy is a thin handle over the stage's pipeline: each call builds an
//! invocation with a fresh completion, submits it outbound, and awaits the
//! correlated settle. Where the invocation actually runs — this node or a
//! remote one — is the router's business, not the caller's.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use orbit_core::{
    AddressableInvocation, AddressableReference, InterfaceId, Key, Message, OrbitResult,
    TIMEOUT_OVERRIDE_HEADER, completion,
};

use crate::pipeline::{MessageContainer, Pipeline};

/// Creates proxies bound to one stage's pipeline.
#[derive(Clone)]
pub struct ProxyFactory {
    pipeline: Arc<Pipeline>,
}

impl ProxyFactory {
    pub(crate) fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    /// A proxy for the addressable identified by `(interface, key)`.
    pub fn reference(
        &self,
        interface: impl Into<InterfaceId>,
        key: Key,
    ) -> AddressableProxy {
        AddressableProxy {
            pipeline: Arc::clone(&self.pipeline),
            reference: AddressableReference::new(interface.into(), key),
            timeout_override: None,
        }
    }
}

/// Client handle for one addressable.
#[derive(Clone)]
pub struct AddressableProxy {
    pipeline: Arc<Pipeline>,
    reference: AddressableReference,
    timeout_override: Option<Duration>,
}

impl AddressableProxy {
    /// The reference this proxy addresses.
    pub fn reference(&self) -> &AddressableReference {
        &self.reference
    }

    /// Override the response timeout for calls through this proxy.
    pub fn with_invocation_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_override = Some(timeout);
        self
    }

    /// Invoke a method and await its result.
    ///
    /// # Errors
    ///
    /// Anything an invocation can produce: placement failures, capacity
    /// rejections, the addressable's own errors, or a timeout.
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> OrbitResult<Value> {
        let mut invocation = AddressableInvocation::new(self.reference.clone(), method, args);
        if let Some(timeout) = self.timeout_override {
            invocation = invocation.with_header(
                TIMEOUT_OVERRIDE_HEADER,
                (timeout.as_millis() as u64).to_string(),
            );
        }

        let (completion_cell, handle) = completion();
        let message = Message::request(invocation);
        self.pipeline
            .submit_outbound(MessageContainer::outbound_request(message, completion_cell))
            .await?;
        handle.wait().await
    }
}
