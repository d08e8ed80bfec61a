//! Exponential backoff for throttled provider calls.

use launchpad_core::provider::ProviderResult;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Backoff applied to `Throttled` failures. Other failures are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2,
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

    /// Delay after the given failed attempt (1-based): `base * multiplier^(attempt - 1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.base_delay
            .saturating_mul(self.backoff_multiplier.saturating_pow(exponent))
    }

    /// Run `call` until it succeeds, fails with a non-retryable error, or the
    /// attempts are exhausted. The last error is returned on exhaustion.
    pub async fn run<T, F, Fut>(&self, operation: &str, resource: &str, mut call: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        operation,
                        resource,
                        attempt,
                        delay = ?delay,
                        error = %err,
                        "provider throttled, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchpad_core::provider::ProviderError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_double_from_one_second() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..5).map(|a| policy.delay_after(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8]);
    }

    #[tokio::test(start_paused = true)]
    async fn throttling_is_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();

        let result = RetryPolicy::default()
            .run("create", "registry.images", || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ProviderError::Throttled("rate exceeded".into()))
                    } else {
                        Ok("repo-1")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("repo-1"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn throttling_gives_up_after_five_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();

        let result: ProviderResult<()> = RetryPolicy::default()
            .run("create", "registry.images", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::Throttled("rate exceeded".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(ProviderError::Throttled(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(started.elapsed() >= Duration::from_secs(1 + 2 + 4 + 8));
        assert!(started.elapsed() < Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn other_failures_propagate_immediately() {
        for err in [
            ProviderError::NotAuthorized("denied".into()),
            ProviderError::Conflict("exists".into()),
            ProviderError::NotFound("gone".into()),
            ProviderError::Unknown("boom".into()),
        ] {
            let calls = Arc::new(AtomicU32::new(0));
            let expected = err.clone();
            let result: ProviderResult<()> = RetryPolicy::default()
                .run("update", "cluster.main", || {
                    let calls = calls.clone();
                    let err = err.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(err)
                    }
                })
                .await;

            assert_eq!(result, Err(expected));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }
}
