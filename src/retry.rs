//! Scoped retry with exponential backoff and jitter
//!
//! Retries are attached to the whitelisted transient error kinds only
//! (rate limit, timeout, connect). Everything else propagates on the
//! first attempt so validation and injection errors are never masked.

use crate::error::{PipelineError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Backoff policy for transient upstream failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (0-based), with up to 25% jitter.
    fn delay_for(&self, retry: usize) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry as u32))
            .min(self.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=exp.as_millis() as u64 / 4);
        exp + Duration::from_millis(jitter_ms)
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// attempt budget is exhausted. Exhaustion surfaces as
/// `UpstreamUnavailable` carrying the last transient error.
pub async fn retry_transient<T, F, Fut>(policy: &RetryPolicy, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err: Option<PipelineError> = None;

    for attempt in 0..policy.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                if attempt + 1 < policy.max_attempts {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        op = op_name,
                        attempt = attempt + 1,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off"
                    );
                    sleep(delay).await;
                }
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    let last = last_err
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    Err(PipelineError::UpstreamUnavailable(format!(
        "{} failed after {} attempts: {}",
        op_name, policy.max_attempts, last
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicUsize::new(0);
        let result = retry_transient(&fast_policy(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(PipelineError::Timeout("slow".into()))
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
    async fn test_non_transient_propagates_immediately() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_transient(&fast_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PipelineError::Configuration("bad key".into())) }
        })
        .await;

        assert!(matches!(result, Err(PipelineError::Configuration(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_maps_to_upstream_unavailable() {
        let result: Result<()> = retry_transient(&fast_policy(), "embed", || async {
            Err(PipelineError::RateLimit("429".into()))
        })
        .await;

        match result.unwrap_err() {
            PipelineError::UpstreamUnavailable(msg) => {
                assert!(msg.contains("embed"));
                assert!(msg.contains("3 attempts"));
            }
            other => panic!("expected UpstreamUnavailable, got {:?}", other),
        }
    }
}
