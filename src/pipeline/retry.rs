use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::RequestConfig;

/// Bounded exponential backoff.
///
/// The delay before retry `n` (1-based) is `base_delay * 2^(n-1)`, capped at
/// `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

/// The last error of an operation that did not succeed.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    /// Attempts made before giving up.
    pub attempts: u32,
    /// Error from the final attempt.
    pub error: E,
}

impl RetryPolicy {
    /// Build from request configuration (`max_retries` retries after the first attempt)
    pub fn from_config(config: &RequestConfig) -> Self {
        Self {
            max_attempts: config.max_retries.saturating_add(1),
            base_delay: Duration::from_millis(config.retry_delay_ms),
            max_delay: Duration::from_millis(config.max_retry_delay_ms),
        }
    }

    /// A policy that retries without waiting
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before the given retry (1 = first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 2_u32.checked_pow(retry - 1).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `is_transient` decides whether an error is worth another attempt.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        mut op: F,
        is_transient: impl Fn(&E) -> bool,
    ) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    let transient = is_transient(&error);
                    if !transient || attempt >= max_attempts {
                        return Err(RetryExhausted {
                            attempts: attempt,
                            error,
                        });
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = %label,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RequestConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_from_config() {
        let policy = RetryPolicy::from_config(&RequestConfig {
            timeout_ms: 1000,
            max_retries: 3,
            retry_delay_ms: 100,
            max_retry_delay_ms: 250,
        });
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(250));
        assert_eq!(policy.delay_for(40), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::immediate(3);

        let result: Result<u32, RetryExhausted<String>> = policy
            .run(
                "test",
                move || async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err("busy".to_string())
                    } else {
                        Ok(n)
                    }
                },
                |_| true,
            )
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::immediate(2);

        let result: Result<(), RetryExhausted<String>> = policy
            .run(
                "test",
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("busy".to_string())
                },
                |_| true,
            )
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(err.error, "busy");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::immediate(5);

        let result: Result<(), RetryExhausted<String>> = policy
            .run(
                "test",
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("bad request".to_string())
                },
                |e| !e.starts_with("bad"),
            )
            .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
