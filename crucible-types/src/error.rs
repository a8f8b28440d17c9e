use serde::{Deserialize, Serialize};

/// Canonical error kinds from §4.4/§7. A `NoSuitableProvider` error is
/// surfaced as `Configuration`; a `CircuitOpen` fast-fail is surfaced
/// unchanged and is never classified as `Provider`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    Provider,
    RateLimit,
    Streaming,
    Session,
    Process,
    Configuration,
    Memory,
    Permission,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl ErrorCategory {
    pub fn severity(&self) -> Severity {
        match self {
            ErrorCategory::Memory | ErrorCategory::Permission | ErrorCategory::Configuration => {
                Severity::Critical
            }
            ErrorCategory::Provider | ErrorCategory::Process | ErrorCategory::Session => {
                Severity::High
            }
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::RateLimit => {
                Severity::Medium
            }
            ErrorCategory::Streaming | ErrorCategory::Unknown => Severity::Low,
        }
    }

    pub fn recoverable(&self) -> bool {
        !matches!(
            self,
            ErrorCategory::Configuration | ErrorCategory::Memory | ErrorCategory::Permission
        )
    }
}

/// Raised by a provider after classification (§7: "classify and raise an
/// AgentException carrying category/severity/recoverable/agentId").
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{category:?} error for agent {agent_id}: {message}")]
pub struct AgentException {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub recoverable: bool,
    pub agent_id: String,
    pub message: String,
}

impl AgentException {
    pub fn new(category: ErrorCategory, agent_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: category.severity(),
            recoverable: category.recoverable(),
            category,
            agent_id: agent_id.into(),
            message: message.into(),
        }
    }
}
