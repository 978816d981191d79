//! Response tracking: correlating replies to pending invocations.
//!
//! Every outbound invocation registers its [`Completion`] here under the
//! message id before routing. A matching response settles it; the periodic
//! sweep settles overdue entries with a timeout. A response for an unknown
//! id is a late arrival after timeout and is dropped silently (logged at
//! debug).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use orbit_core::{Clock, Completion, CompletionResult, OrbitError, OrbitResult};

struct Pending {
    completion: Completion,
    deadline: u64,
    timeout_millis: u64,
}

/// Maps in-flight message ids to their completions and deadlines.
pub struct ResponseTracker {
    pending: DashMap<u64, Pending>,
    clock: Arc<dyn Clock>,
}

impl ResponseTracker {
    /// Create an empty tracker reading deadlines from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            pending: DashMap::new(),
            clock,
        }
    }

    /// Register a pending invocation. The deadline is `now + timeout`.
    ///
    /// # Errors
    ///
    /// A duplicate id is a runtime bug: the incoming completion is settled
    /// with `InvalidState` and the same error is returned.
    pub fn track(
        &self,
        message_id: u64,
        completion: Completion,
        timeout: Duration,
    ) -> OrbitResult<()> {
        let timeout_millis = timeout.as_millis() as u64;
        let deadline = self.clock.now() + timeout_millis;
        match self.pending.entry(message_id) {
            Entry::Vacant(slot) => {
                slot.insert(Pending {
                    completion,
                    deadline,
                    timeout_millis,
                });
                Ok(())
            }
            Entry::Occupied(_) => {
                let error = OrbitError::invalid_state(format!(
                    "message id {} is already tracked",
                    message_id
                ));
                completion.fail(OrbitError::invalid_state(format!(
                    "message id {} is already tracked",
                    message_id
                )));
                Err(error)
            }
        }
    }

    /// Settle the pending invocation for `message_id`. Returns false when the
    /// id is unknown — a late response after timeout, dropped silently.
    pub fn settle(&self, message_id: u64, result: CompletionResult) -> bool {
        match self.pending.remove(&message_id) {
            Some((_, pending)) => {
                pending.completion.settle(result);
                true
            }
            None => {
                tracing::debug!(message_id, "dropping response for untracked message");
                false
            }
        }
    }

    /// Sweep: settle every entry whose deadline has passed with a timeout
    /// error and remove it before returning.
    pub fn on_tick(&self) {
        let now = self.clock.now();
        let expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| *entry.key())
            .collect();

        for message_id in expired {
            if let Some((_, pending)) = self.pending.remove(&message_id) {
                tracing::debug!(message_id, "pending invocation timed out");
                pending.completion.fail(OrbitError::Timeout {
                    millis: pending.timeout_millis,
                });
            }
        }
    }

    /// Settle everything still pending with `Cancelled`. Called on stage
    /// stop so no caller is left hanging.
    pub fn fail_all_cancelled(&self) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for message_id in ids {
            if let Some((_, pending)) = self.pending.remove(&message_id) {
                pending.completion.fail(OrbitError::Cancelled);
            }
        }
    }

    /// Number of in-flight invocations.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_core::{ManualClock, completion};
    use serde_json::json;

    fn tracker() -> (Arc<ManualClock>, ResponseTracker) {
        let clock = Arc::new(ManualClock::new());
        let tracker = ResponseTracker::new(Arc::clone(&clock) as Arc<dyn Clock>);
        (clock, tracker)
    }

    #[tokio::test]
    async fn test_settle_resolves_completion() {
        let (_clock, tracker) = tracker();
        let (completion, handle) = completion();
        tracker
            .track(1, completion, Duration::from_millis(100))
            .expect("track");

        assert!(tracker.settle(1, Ok(json!("pong"))));
        assert_eq!(handle.wait().await.expect("value"), json!("pong"));
        assert_eq!(tracker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let (_clock, tracker) = tracker();
        let (first, _first_handle) = completion();
        tracker
            .track(1, first, Duration::from_millis(100))
            .expect("track");

        let (second, second_handle) = completion();
        let err = tracker
            .track(1, second, Duration::from_millis(100))
            .expect_err("duplicate");
        assert!(matches!(err, OrbitError::InvalidState { .. }));
        assert!(matches!(
            second_handle.wait().await,
            Err(OrbitError::InvalidState { .. })
        ));
        // The original registration survives.
        assert_eq!(tracker.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_late_settle_is_dropped() {
        let (_clock, tracker) = tracker();
        assert!(!tracker.settle(99, Ok(json!(1))));
    }

    #[tokio::test]
    async fn test_sweep_times_out_expired_entries() {
        let (clock, tracker) = tracker();
        let (first, first_handle) = completion();
        let (second, second_handle) = completion();
        tracker
            .track(1, first, Duration::from_millis(50))
            .expect("track");
        tracker
            .track(2, second, Duration::from_millis(500))
            .expect("track");

        clock.advance(Duration::from_millis(100));
        tracker.on_tick();

        assert!(matches!(
            first_handle.wait().await,
            Err(OrbitError::Timeout { millis: 50 })
        ));
        assert_eq!(tracker.pending_count(), 1);

        // A settle arriving after the timeout is silently dropped.
        assert!(!tracker.settle(1, Ok(json!("late"))));

        clock.advance(Duration::from_millis(500));
        tracker.on_tick();
        assert!(matches!(
            second_handle.wait().await,
            Err(OrbitError::Timeout { .. })
        ));
        assert_eq!(tracker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_detached_observer_still_swept() {
        let (clock, tracker) = tracker();
        let (completion_cell, handle) = completion();
        tracker
            .track(1, completion_cell, Duration::from_millis(10))
            .expect("track");

        // Caller stops waiting; tracking must survive until the sweep.
        drop(handle);
        assert_eq!(tracker.pending_count(), 1);

        clock.advance(Duration::from_millis(20));
        tracker.on_tick();
        assert_eq!(tracker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_all_cancelled() {
        let (_clock, tracker) = tracker();
        let (completion_cell, handle) = completion();
        tracker
            .track(7, completion_cell, Duration::from_millis(1_000))
            .expect("track");

        tracker.fail_all_cancelled();
        assert!(matches!(handle.wait().await, Err(OrbitError::Cancelled)));
        assert_eq!(tracker.pending_count(), 0);
    }
}
