//! Worker pools and task supervision.
//!
//! The stage runs logic on a CPU-bound pool and I/O (directory, transport)
//! on an I/O-bound pool; both are `tokio` runtime handles and default to the
//! ambient runtime. Every long-running task is spawned through [`Pools`] so
//! a failure is reported to the global error handler and terminates only
//! that task, never its siblings. Cooperative shutdown flows through the
//! root [`CancellationToken`].

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use orbit_core::{OrbitError, OrbitResult};

/// Process-wide handler for errors that have no caller to propagate to
/// (tick failures, orphaned background tasks, unmatched responses).
pub type ErrorHandler = Arc<dyn Fn(&OrbitError) + Send + Sync>;

/// An [`ErrorHandler`] that logs through `tracing`.
pub fn logging_error_handler() -> ErrorHandler {
    Arc::new(|error| {
        tracing::error!(%error, "unhandled runtime error");
    })
}

/// The stage's two worker pools plus the supervising root.
pub struct Pools {
    cpu: Handle,
    io: Handle,
    root: CancellationToken,
    error_handler: ErrorHandler,
}

impl Pools {
    /// Build pools over explicit runtime handles.
    pub fn new(cpu: Handle, io: Handle, error_handler: ErrorHandler) -> Self {
        Self {
            cpu,
            io,
            root: CancellationToken::new(),
            error_handler,
        }
    }

    /// Build pools over the ambient runtime for both groups.
    ///
    /// # Panics
    ///
    /// Panics outside a tokio runtime context.
    pub fn from_current(error_handler: ErrorHandler) -> Self {
        let handle = Handle::current();
        Self::new(handle.clone(), handle, error_handler)
    }

    /// The root cancellation token; child tokens derive from it.
    pub fn root_token(&self) -> &CancellationToken {
        &self.root
    }

    /// The installed error handler.
    pub fn error_handler(&self) -> &ErrorHandler {
        &self.error_handler
    }

    /// Spawn a supervised task on the CPU pool.
    pub fn spawn_cpu<F>(&self, name: &'static str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = OrbitResult<()>> + Send + 'static,
    {
        self.spawn_on(&self.cpu, name, future)
    }

    /// Spawn a supervised task on the I/O pool.
    pub fn spawn_io<F>(&self, name: &'static str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = OrbitResult<()>> + Send + 'static,
    {
        self.spawn_on(&self.io, name, future)
    }

    fn spawn_on<F>(&self, handle: &Handle, name: &'static str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = OrbitResult<()>> + Send + 'static,
    {
        let error_handler = Arc::clone(&self.error_handler);
        handle.spawn(async move {
            match future.await {
                Ok(()) => {}
                Err(OrbitError::Cancelled) => {
                    tracing::debug!(task = name, "task cancelled");
                }
                Err(error) => {
                    tracing::error!(task = name, %error, "supervised task failed");
                    error_handler(&error);
                }
            }
        })
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler() -> (ErrorHandler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let handler: ErrorHandler = Arc::new(move |_error| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (handler, count)
    }

    #[tokio::test]
    async fn test_failure_reaches_error_handler() {
        let (handler, count) = counting_handler();
        let pools = Pools::from_current(handler);

        pools
            .spawn_cpu("failing", async { Err(OrbitError::invalid_state("boom")) })
            .await
            .expect("join");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_is_not_an_error() {
        let (handler, count) = counting_handler();
        let pools = Pools::from_current(handler);

        pools
            .spawn_io("cancelled", async { Err(OrbitError::Cancelled) })
            .await
            .expect("join");
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_cancel_siblings() {
        let (handler, _count) = counting_handler();
        let pools = Pools::from_current(handler);

        let seen: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let sibling_seen = Arc::clone(&seen);

        let failing = pools.spawn_cpu("failing", async { Err(OrbitError::invalid_state("boom")) });
        let sibling = pools.spawn_cpu("sibling", async move {
            tokio::task::yield_now().await;
            sibling_seen
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push("ran");
            Ok(())
        });

        failing.await.expect("join");
        sibling.await.expect("join");
        assert_eq!(
            seen.lock().unwrap_or_else(|e| e.into_inner()).as_slice(),
            &["ran"]
        );
    }
}
