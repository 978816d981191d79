//! Exponential-backoff retry helper.
//!
//! Used by directory and transport clients around transient failures. The
//! runtime itself never retries at the actor level; callers opt in with this
//! helper.

use std::future::Future;
use std::time::Duration;

use orbit_core::OrbitResult;

/// Backoff parameters for [`attempt`].
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Ceiling on the delay between attempts.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failure.
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// The delay to wait after the given number of failures (1-based).
    pub fn delay_after(&self, failures: u32) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 1..failures {
            delay = delay.mul_f64(self.factor).min(self.max_delay);
        }
        delay
    }
}

/// Run `op` until it succeeds or the policy's attempts are exhausted; the
/// final attempt's error propagates. Failures before the last attempt are
/// logged and followed by an exponentially growing delay.
pub async fn attempt<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> OrbitResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = OrbitResult<T>>,
{
    let mut failures = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                failures += 1;
                if failures >= policy.max_attempts.max(1) {
                    return Err(error);
                }
                let delay = policy.delay_after(failures);
                tracing::warn!(
                    attempt = failures,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_core::OrbitError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            factor: 2.0,
        }
    }

    #[test]
    fn test_delay_growth_is_capped() {
        let policy = fast_policy(10);
        assert_eq!(policy.delay_after(1), Duration::from_millis(1));
        assert_eq!(policy.delay_after(2), Duration::from_millis(2));
        assert_eq!(policy.delay_after(3), Duration::from_millis(4));
        // Capped at max_delay from here on.
        assert_eq!(policy.delay_after(4), Duration::from_millis(4));
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let result = attempt(&fast_policy(5), move || {
            let seen = Arc::clone(&seen);
            async move {
                if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(OrbitError::transport("flaky"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.expect("value"), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_final_error_propagates() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let result: OrbitResult<()> = attempt(&fast_policy(3), move || {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(OrbitError::transport("always down"))
            }
        })
        .await;
        assert!(matches!(result, Err(OrbitError::Transport { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_none_policy_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let result: OrbitResult<()> = attempt(&RetryPolicy::none(), move || {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(OrbitError::transport("down"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
