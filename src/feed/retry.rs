//! One retry policy for every upstream call.
//!
//! Providers do not retry on their own; the fetch orchestrator wraps each
//! upstream call in this policy so backoff behavior is identical across
//! providers: exponential delay with jitter, longer waits after a 429, and
//! no retries at all for errors that will not heal (4xx, malformed bodies).

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::providers::ProviderError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, exhausts the attempt budget, or fails
    /// with a non-retryable error.
    pub async fn run<F, Fut, T>(&self, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.max_attempts || !err.is_retryable() {
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt, &err);
                    debug!(
                        "upstream attempt {}/{} failed ({}), retrying in {:?}",
                        attempt, self.max_attempts, err, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Delay before the attempt following attempt number `attempt` (1-based).
    ///
    /// Exponential in the attempt number, capped at `max_delay`, jittered
    /// into `[cap/2, cap]` so synchronized callers spread out.  Rate-limit
    /// errors wait at least the upstream's `Retry-After` when present and
    /// double the exponential delay when not.
    pub fn delay_for(&self, attempt: u32, err: &ProviderError) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let base = match err {
            ProviderError::RateLimited {
                retry_after: Some(ra),
            } => (*ra).max(exp),
            ProviderError::RateLimited { retry_after: None } => exp.saturating_mul(2),
            _ => exp,
        };
        let capped = base.min(self.max_delay);
        let millis = capped.as_millis() as u64;
        if millis < 2 {
            return capped;
        }
        let jittered = millis / 2 + rand::thread_rng().gen_range(0..=millis / 2);
        Duration::from_millis(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = fast_policy()
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ProviderError::Timeout)
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy()
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::Timeout) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy()
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ProviderError::Http { status: 404 })
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
        };
        // Jitter keeps each delay in [cap/2, cap]; the floor of attempt 3
        // (400/2 = 200ms) exceeds the ceiling of attempt 1 (100ms).
        let d1 = policy.delay_for(1, &ProviderError::Timeout);
        let d3 = policy.delay_for(3, &ProviderError::Timeout);
        assert!(d1 <= Duration::from_millis(100));
        assert!(d3 >= Duration::from_millis(200));
    }

    #[test]
    fn test_rate_limit_waits_longer() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
        };
        let plain_max = Duration::from_millis(100);
        let limited = policy.delay_for(
            1,
            &ProviderError::RateLimited {
                retry_after: Some(Duration::from_secs(5)),
            },
        );
        assert!(limited >= Duration::from_millis(2500));
        assert!(limited > plain_max);
    }

    #[test]
    fn test_delay_respects_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
        };
        let d = policy.delay_for(9, &ProviderError::Timeout);
        assert!(d <= Duration::from_secs(2));
    }
}
