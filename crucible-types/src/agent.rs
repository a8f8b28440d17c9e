use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three agent archetypes a coordinator can spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Coordinator,
    Implementor,
    Verifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Active,
    Completed,
    Cancelled,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Smart,
    Fast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub role: AgentRole,
    pub status: AgentStatus,
    pub workspace_id: String,
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub preferred_model_tier: Option<ModelTier>,
}

impl Agent {
    pub fn new(
        id: String,
        name: impl Into<String>,
        role: AgentRole,
        workspace_id: impl Into<String>,
        parent_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            role,
            status: AgentStatus::Idle,
            workspace_id: workspace_id.into(),
            parent_id,
            created_at: now,
            updated_at: now,
            preferred_model_tier: None,
        }
    }

    /// Capabilities that §4.3 requires a provider to supply for this role.
    pub fn required_capabilities(&self) -> &'static [&'static str] {
        required_capabilities_for_role(self.role)
    }
}

/// Each role has a fixed set of required capabilities (§4.3): Coordinator
/// requires tool-calling; Implementor requires file-editing and terminal;
/// Verifier requires terminal.
pub fn required_capabilities_for_role(role: AgentRole) -> &'static [&'static str] {
    match role {
        AgentRole::Coordinator => &["tool_calling"],
        AgentRole::Implementor => &["file_editing", "terminal"],
        AgentRole::Verifier => &["terminal"],
    }
}

/// Phase ∈ {Idle, Planning, Ready, Executing, Verifying, NeedsFix, Completed,
/// Failed}, plus `MaxWavesReached`, which the pipeline engine transitions to
/// when the iteration budget is exhausted without an approved verdict (§4.7
/// step 5); not a named phase in §3 but required by the execution-loop
/// contract, so it is added here rather than overloading `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationPhase {
    Idle,
    Planning,
    Ready,
    Executing,
    Verifying,
    NeedsFix,
    Completed,
    Failed,
    MaxWavesReached,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationState {
    pub phase: CoordinationPhase,
    pub workspace_id: String,
    pub coordinator_agent_id: Option<String>,
    pub active_agent_ids: std::collections::HashSet<String>,
    pub current_wave: u32,
}

impl CoordinationState {
    pub fn new(workspace_id: impl Into<String>) -> Self {
        Self {
            phase: CoordinationPhase::Idle,
            workspace_id: workspace_id.into(),
            coordinator_agent_id: None,
            active_agent_ids: std::collections::HashSet::new(),
            current_wave: 0,
        }
    }
}
