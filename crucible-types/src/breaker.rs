use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Observable breaker metrics; the state machine itself lives in
/// `crucible-resilience` — this is the snapshottable data §3 describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub name: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub total_requests: u64,
    pub total_failures: u64,
}

impl CircuitBreakerState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: BreakerState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure: None,
            total_requests: 0,
            total_failures: 0,
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.total_requests as f64
        }
    }
}
