//! Backend reads: the `Fetcher` seam, retry with exponential backoff and
//! per-attempt timeouts.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::domain::FetchRequest;

use super::error::FetchError;

const METRIC_FETCH_RETRY: &str = "storeops_fetch_retry_total";

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Performs one backend read and returns the unwrapped payload.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<Value, FetchError>;
}

/// Retry settings from the `[retry]` table of `storeops.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
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

    /// Wait after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1_u64
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(factor)
                .min(self.max_delay_ms),
        )
    }

    pub fn should_retry(&self, error: &FetchError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_attempts.max(1)
    }

    /// Run `call` until it succeeds, fails with a non-retryable error, or
    /// the attempt budget is spent. `call` receives the 1-based attempt.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, FetchError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 1;
        loop {
            match call(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if self.should_retry(&err, attempt) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Backend read failed, retrying"
                    );
                    counter!(METRIC_FETCH_RETRY, "kind" => err.kind().as_str()).increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Bound `future` by `limit`, mapping expiry to `FetchError::Timeout`.
pub async fn with_timeout<T, Fut>(limit: Duration, future: Fut) -> Result<T, FetchError>
where
    Fut: Future<Output = Result<T, FetchError>>,
{
    tokio::time::timeout(limit, future)
        .await
        .unwrap_or_else(|_| {
            Err(FetchError::Timeout {
                elapsed_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            })
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::time::Instant;

    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(80), Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_with_backoff() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        };
        let started = Instant::now();
        let calls = Mutex::new(Vec::new());

        let value = policy
            .run("orders.list", |attempt| {
                calls.lock().expect("calls").push(started.elapsed());
                async move {
                    if attempt < 3 {
                        Err(FetchError::from_status(503, "unavailable"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .expect("third attempt succeeds");

        assert_eq!(value, 3);
        assert_eq!(
            *calls.lock().expect("calls"),
            vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(3)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failures_are_not_retried() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let err = policy
            .run("orders.list", |_| {
                calls += 1;
                async { Err::<(), _>(FetchError::from_status(401, "expired")) }
            })
            .await
            .expect_err("401 fails");

        assert_eq!(calls, 1);
        assert!(err.is_session_expiry());
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_bounded() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 10,
            max_delay_ms: 10,
        };
        let mut calls = 0;
        let err = policy
            .run("dashboard.stats", |_| {
                calls += 1;
                async { Err::<(), _>(FetchError::network("refused")) }
            })
            .await
            .expect_err("always fails");

        assert_eq!(calls, 2);
        assert!(err.is_network());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out() {
        let err = with_timeout(Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, FetchError>(())
        })
        .await
        .expect_err("times out");

        assert_eq!(err, FetchError::Timeout { elapsed_ms: 5_000 });
    }
}
