//! The addressable instance contract.
//!
//! An [`Addressable`] is the application-side object a handler owns. The
//! runtime serializes all calls to one instance, so methods take `&mut self`
//! and the instance needs no internal synchronization. Method dispatch is by
//! name: the runtime carries no reflection, and each implementation matches
//! on the method string itself (typically via a small `match`).

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{OrbitError, OrbitResult};

/// An addressable instance hosted by an execution handler.
///
/// `on_activate` runs once before the first invocation; `on_deactivate` runs
/// once after the last. Both default to no-ops. Instances registered as
/// externally managed singletons skip the hooks entirely.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use orbit_core::{Addressable, OrbitError, OrbitResult};
/// use serde_json::{Value, json};
///
/// struct Counter {
///     count: i64,
/// }
///
/// #[async_trait]
/// impl Addressable for Counter {
///     async fn invoke(&mut self, method: &str, _args: Vec<Value>) -> OrbitResult<Value> {
///         match method {
///             "increment" => {
///                 self.count += 1;
///                 Ok(json!(self.count))
///             }
///             other => Err(OrbitError::invocation(format!("unknown method: {}", other))),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Addressable: Send + 'static {
    /// Called once when the instance is activated, before any invocation.
    async fn on_activate(&mut self) -> OrbitResult<()> {
        Ok(())
    }

    /// Called once when the instance is deactivated. Best-effort: a failure
    /// is logged but does not block deactivation.
    async fn on_deactivate(&mut self) -> OrbitResult<()> {
        Ok(())
    }

    /// Invoke the named method with positional arguments.
    async fn invoke(&mut self, method: &str, args: Vec<Value>) -> OrbitResult<Value>;
}

/// Factory producing fresh instances for auto-activated interfaces.
pub type AddressableFactory = Arc<dyn Fn() -> Box<dyn Addressable> + Send + Sync>;

/// Helper for implementations: the "unknown method" rejection.
pub fn unknown_method(method: &str) -> OrbitError {
    OrbitError::invocation(format!("unknown method: {}", method))
}
