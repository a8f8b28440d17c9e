use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crucible_types::{BreakerState, CircuitBreakerState};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker open")]
    CircuitOpen,
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub volume_threshold: u64,
    pub timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            volume_threshold: 10,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Per-provider circuit breaker (§4.4). All transitions happen under the
/// state mutex; [`CircuitBreaker::snapshot`] is a cheap read for metrics.
pub struct CircuitBreaker {
    state: Mutex<CircuitBreakerState>,
    config: BreakerConfig,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            state: Mutex::new(CircuitBreakerState::new(name)),
            config,
        }
    }

    pub async fn snapshot(&self) -> CircuitBreakerState {
        self.state.lock().await.clone()
    }

    /// Runs `f`, guarding it with the breaker. Fails fast with
    /// `BreakerError::CircuitOpen` while the breaker is `Open` and the
    /// timeout hasn't elapsed; otherwise admits the call and updates state
    /// from the outcome.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        {
            let mut state = self.state.lock().await;
            if state.state == BreakerState::Open {
                let elapsed = state
                    .last_failure
                    .map(|t| Utc::now() - t)
                    .unwrap_or_else(chrono::Duration::zero);
                let timeout = chrono::Duration::from_std(self.config.timeout)
                    .unwrap_or_else(|_| chrono::Duration::seconds(60));
                if elapsed >= timeout {
                    tracing::info!(breaker = %state.name, "admitting probe call, half-open");
                    state.state = BreakerState::HalfOpen;
                    state.consecutive_successes = 0;
                } else {
                    return Err(BreakerError::CircuitOpen);
                }
            }
            state.total_requests += 1;
        }

        match f().await {
            Ok(value) => {
                let mut state = self.state.lock().await;
                match state.state {
                    BreakerState::Closed => {
                        state.consecutive_failures = state.consecutive_failures.saturating_sub(1);
                    }
                    BreakerState::HalfOpen => {
                        state.consecutive_successes += 1;
                        if state.consecutive_successes >= self.config.success_threshold {
                            tracing::info!(breaker = %state.name, "half-open probes succeeded, closing");
                            state.state = BreakerState::Closed;
                            state.consecutive_failures = 0;
                            state.consecutive_successes = 0;
                        }
                    }
                    BreakerState::Open => {}
                }
                Ok(value)
            }
            Err(err) => {
                let mut state = self.state.lock().await;
                state.total_failures += 1;
                state.consecutive_failures += 1;
                state.consecutive_successes = 0;
                state.last_failure = Some(Utc::now());
                match state.state {
                    BreakerState::Closed => {
                        if state.consecutive_failures >= self.config.failure_threshold
                            && state.total_requests >= self.config.volume_threshold
                        {
                            tracing::warn!(breaker = %state.name, "tripping open");
                            state.state = BreakerState::Open;
                            state.consecutive_failures = 0;
                        }
                    }
                    BreakerState::HalfOpen => {
                        tracing::warn!(breaker = %state.name, "probe failed, reopening");
                        state.state = BreakerState::Open;
                        state.consecutive_failures = 0;
                    }
                    BreakerState::Open => {}
                }
                Err(BreakerError::Inner(err))
            }
        }
    }
}

/// Singleton breakers keyed by provider name (§4.4).
#[derive(Default)]
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_create(&self, name: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().await.get(name) {
            return existing.clone();
        }
        let mut breakers = self.breakers.write().await;
        breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config)))
            .clone()
    }

    pub async fn snapshot_all(&self) -> Vec<CircuitBreakerState> {
        let breakers = self.breakers.read().await;
        let mut out = Vec::with_capacity(breakers.len());
        for breaker in breakers.values() {
            out.push(breaker.snapshot().await);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fail() -> Result<(), &'static str> {
        Err("boom")
    }
    async fn ok() -> Result<(), &'static str> {
        Ok(())
    }

    #[tokio::test]
    async fn trips_open_after_threshold_with_enough_volume() {
        let breaker = CircuitBreaker::new(
            "p",
            BreakerConfig {
                failure_threshold: 2,
                success_threshold: 2,
                volume_threshold: 2,
                timeout: Duration::from_secs(60),
            },
        );
        let _ = breaker.call(fail).await;
        let _ = breaker.call(fail).await;
        let result = breaker.call(ok).await;
        assert!(matches!(result, Err(BreakerError::CircuitOpen)));
    }

    #[tokio::test]
    async fn half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new(
            "p",
            BreakerConfig {
                failure_threshold: 1,
                success_threshold: 2,
                volume_threshold: 1,
                timeout: Duration::from_millis(0),
            },
        );
        let _ = breaker.call(fail).await;
        assert_eq!(breaker.snapshot().await.state, BreakerState::Open);

        breaker.call(ok).await.unwrap();
        assert_eq!(breaker.snapshot().await.state, BreakerState::HalfOpen);
        breaker.call(ok).await.unwrap();
        assert_eq!(breaker.snapshot().await.state, BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(
            "p",
            BreakerConfig {
                failure_threshold: 1,
                success_threshold: 2,
                volume_threshold: 1,
                timeout: Duration::from_millis(0),
            },
        );
        let _ = breaker.call(fail).await;
        let _ = breaker.call(fail).await; // probe admitted, fails again
        assert_eq!(breaker.snapshot().await.state, BreakerState::Open);
    }

    #[tokio::test]
    async fn success_in_closed_decays_failure_counter() {
        let breaker = CircuitBreaker::new(
            "p",
            BreakerConfig {
                failure_threshold: 5,
                success_threshold: 2,
                volume_threshold: 10,
                timeout: Duration::from_secs(60),
            },
        );
        let _ = breaker.call(fail).await;
        let _ = breaker.call(fail).await;
        breaker.call(ok).await.unwrap();
        assert_eq!(breaker.snapshot().await.consecutive_failures, 1);
    }
}
