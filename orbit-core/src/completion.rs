//! One-shot result cell for pending invocations.
//!
//! Every invocation produces a [`Completion`] (the settle side, held by the
//! runtime) and a [`CompletionHandle`] (the await side, held by the caller).
//! A completion is settled exactly once — with the returned value, an error,
//! or a timeout. Dropping an unsettled completion is a runtime bug; the drop
//! guard settles it with [`OrbitError::BrokenCompletion`] and logs a warning
//! so the caller never hangs.
//!
//! Dropping the *handle* merely detaches the observer: the eventual settle
//! still happens and is simply unobserved.

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::OrbitError;

/// The value a completion settles with.
pub type CompletionResult = Result<Value, OrbitError>;

/// Create a linked completion / handle pair.
pub fn completion() -> (Completion, CompletionHandle) {
    let (tx, rx) = oneshot::channel();
    (Completion { tx: Some(tx) }, CompletionHandle { rx })
}

/// Settle side of a pending invocation. Settling consumes the completion,
/// making a double settle unrepresentable.
#[derive(Debug)]
pub struct Completion {
    tx: Option<oneshot::Sender<CompletionResult>>,
}

impl Completion {
    /// Settle with a result. A detached observer is not an error; the settle
    /// is simply unobserved.
    pub fn settle(mut self, result: CompletionResult) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(result);
        }
    }

    /// Settle with a successful value.
    pub fn succeed(self, value: Value) {
        self.settle(Ok(value));
    }

    /// Settle with an error.
    pub fn fail(self, error: OrbitError) {
        self.settle(Err(error));
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tracing::warn!("completion dropped without being settled");
            let _ = tx.send(Err(OrbitError::BrokenCompletion));
        }
    }
}

/// Await side of a pending invocation.
#[derive(Debug)]
pub struct CompletionHandle {
    rx: oneshot::Receiver<CompletionResult>,
}

impl CompletionHandle {
    /// Wait for the completion to settle.
    pub async fn wait(self) -> CompletionResult {
        match self.rx.await {
            Ok(result) => result,
            // Unreachable in practice: the drop guard always settles.
            Err(_) => Err(OrbitError::BrokenCompletion),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_settle_value() {
        let (completion, handle) = completion();
        completion.succeed(json!(42));
        let result = handle.wait().await;
        assert_eq!(result.expect("value"), json!(42));
    }

    #[tokio::test]
    async fn test_settle_error() {
        let (completion, handle) = completion();
        completion.fail(OrbitError::Timeout { millis: 10 });
        let result = handle.wait().await;
        assert!(matches!(result, Err(OrbitError::Timeout { millis: 10 })));
    }

    #[tokio::test]
    async fn test_drop_settles_broken() {
        let (completion, handle) = completion();
        drop(completion);
        let result = handle.wait().await;
        assert!(matches!(result, Err(OrbitError::BrokenCompletion)));
    }

    #[tokio::test]
    async fn test_detached_observer_does_not_panic() {
        let (completion, handle) = completion();
        drop(handle);
        completion.succeed(json!("unobserved"));
    }
}
