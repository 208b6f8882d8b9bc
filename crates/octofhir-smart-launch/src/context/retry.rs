//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use crate::error::LaunchError;

/// Retry schedule for one network leg.
///
/// `max_attempts` counts every attempt including the first. The backoff before
/// retry `n` (1-based) is `initial_backoff * 2^(n-1)`, capped at `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, at least 1.
    pub max_attempts: u32,
    /// Sleep before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for any single sleep.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200), Duration::from_secs(2))
    }
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` of zero is treated as one.
    #[must_use]
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Returns the sleep before the given retry (1 for the first retry).
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Runs `operation` until it succeeds, fails permanently or attempts run out.
    ///
    /// Only errors for which [`LaunchError::is_retryable`] holds are retried.
    /// When attempts are exhausted the last transient error is returned with
    /// its attempt count set to the number of attempts made.
    pub async fn run<T, F, Fut>(&self, leg: &'static str, mut operation: F) -> Result<T, LaunchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LaunchError>>,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match operation().await {
                Ok(value) => return Ok(value),
                Err(LaunchError::TransientFailure { message, .. }) => {
                    if attempts >= self.max_attempts {
                        return Err(LaunchError::transient(message, attempts));
                    }

                    let backoff = self.backoff(attempts);
                    tracing::warn!(
                        leg,
                        attempt = attempts,
                        max_attempts = self.max_attempts,
                        error = %message,
                        backoff_ms = backoff.as_millis() as u64,
                        "Context service call failed, retrying"
                    );

                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(5))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = fast(3)
            .run("test", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(LaunchError::transient("HTTP 503", 1))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_report_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = fast(3)
            .run("test", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(LaunchError::transient("HTTP 502", 1)) }
            })
            .await
            .unwrap_err();

        assert_eq!(err, LaunchError::transient("HTTP 502", 3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = fast(5)
            .run("test", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(LaunchError::auth_failure("invalid_client")) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, LaunchError::AuthFailure { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
