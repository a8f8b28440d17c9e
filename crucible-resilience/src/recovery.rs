use std::future::Future;
use std::time::Duration;

use crucible_core::cancellation::CancellationHandle;
use crucible_types::{AgentException, ErrorCategory};

use crate::classifier::classify;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_multiplier,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Delay before the `attempt`-th retry (1-indexed): `base * k^(attempt-1)`,
    /// capped at `max_delay` (§4.4 default 30s).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32 - 1);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

#[derive(Clone)]
pub enum RecoveryStrategy {
    Retry(RetryPolicy),
    Fallback(String),
    Fail,
}

/// Per-category strategy with the §4.4 defaults.
pub struct RecoveryRegistry;

impl RecoveryRegistry {
    pub fn strategy_for(category: ErrorCategory) -> RecoveryStrategy {
        use Duration as D;
        match category {
            ErrorCategory::Network => {
                RecoveryStrategy::Retry(RetryPolicy::new(3, D::from_secs(1), 2.0))
            }
            ErrorCategory::Timeout => {
                RecoveryStrategy::Retry(RetryPolicy::new(2, D::from_secs(2), 2.0))
            }
            ErrorCategory::RateLimit => {
                RecoveryStrategy::Retry(RetryPolicy::new(3, D::from_secs(5), 2.0))
            }
            ErrorCategory::Streaming => {
                RecoveryStrategy::Retry(RetryPolicy::new(2, D::from_millis(500), 2.0))
            }
            ErrorCategory::Session => {
                RecoveryStrategy::Retry(RetryPolicy::new(2, D::from_secs(1), 2.0))
            }
            ErrorCategory::Process => {
                RecoveryStrategy::Retry(RetryPolicy::new(2, D::from_secs(2), 2.0))
            }
            ErrorCategory::Provider => {
                RecoveryStrategy::Retry(RetryPolicy::new(2, D::from_millis(1500), 2.0))
            }
            ErrorCategory::Unknown => {
                RecoveryStrategy::Retry(RetryPolicy::new(1, D::from_secs(1), 2.0))
            }
            ErrorCategory::Configuration | ErrorCategory::Memory | ErrorCategory::Permission => {
                RecoveryStrategy::Fail
            }
        }
    }
}

/// Runs `f` under the retry policy derived from classifying each failure's
/// message. Never retries a cancellation; sleeps are interruptible by the
/// cancellation handle so a cancelled run doesn't block on backoff.
pub async fn retry_with_policy<F, Fut, T>(
    cancel: &CancellationHandle,
    mut f: F,
) -> Result<T, AgentException>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgentException>>,
{
    let mut attempt: u32 = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(AgentException::new(
                ErrorCategory::Unknown,
                "unknown",
                "cancelled",
            ));
        }
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let category = classify(&err.message);
                let policy = match RecoveryRegistry::strategy_for(category) {
                    RecoveryStrategy::Retry(policy) => policy,
                    RecoveryStrategy::Fallback(_) | RecoveryStrategy::Fail => return Err(err),
                };
                if attempt >= policy.max_attempts {
                    return Err(err);
                }
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(category = ?category, attempt, delay_ms = delay.as_millis() as u64, "retrying after failure");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Err(AgentException::new(ErrorCategory::Unknown, &err.agent_id, "cancelled"));
                    }
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn retries_until_success_within_max_attempts() {
        let cancel = CancellationHandle::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result = retry_with_policy(&cancel, move || {
            let calls = calls2.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(AgentException::new(ErrorCategory::Network, "a", "connection reset"))
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
    async fn gives_up_after_max_attempts() {
        let cancel = CancellationHandle::new();
        let result: Result<(), _> = retry_with_policy(&cancel, || async {
            Err(AgentException::new(ErrorCategory::Timeout, "a", "request timed out"))
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn never_retries_configuration_errors() {
        let cancel = CancellationHandle::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<(), _> = retry_with_policy(&cancel, move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AgentException::new(ErrorCategory::Configuration, "a", "invalid config"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_without_retry() {
        let cancel = CancellationHandle::new();
        cancel.cancel();
        let result: Result<(), _> = retry_with_policy(&cancel, || async {
            Err(AgentException::new(ErrorCategory::Network, "a", "connection reset"))
        })
        .await;
        assert!(result.is_err());
    }
}
