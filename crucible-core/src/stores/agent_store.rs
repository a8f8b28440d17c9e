use std::collections::HashMap;

use crucible_types::Agent;
use tokio::sync::RwLock;

use crate::error::{CoreError, CoreResult};

/// Raw CRUD over agents. Reads never block writes; writes on the same
/// entity are serialised by the per-store write lock (§4.1). Invariant
/// enforcement and event emission live one layer up, in
/// [`crate::stores::Stores`], which has access to the other stores and the
/// event bus.
#[derive(Default)]
pub struct AgentStore {
    agents: RwLock<HashMap<String, Agent>>,
}

impl AgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &str) -> Option<Agent> {
        self.agents.read().await.get(id).cloned()
    }

    pub async fn save(&self, agent: Agent) {
        self.agents.write().await.insert(agent.id.clone(), agent);
    }

    pub async fn delete(&self, id: &str) -> CoreResult<()> {
        self.agents
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CoreError::NotFound(format!("agent {id}")))
    }

    /// Snapshot consistent with the moment of the call; creation-time
    /// ascending within a workspace (§4.1).
    pub async fn list(&self, workspace_id: &str) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self
            .agents
            .read()
            .await
            .values()
            .filter(|a| a.workspace_id == workspace_id)
            .cloned()
            .collect();
        agents.sort_by_key(|a| a.created_at);
        agents
    }
}
