use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Workspace {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Default)]
pub struct WorkspaceStore {
    workspaces: RwLock<HashMap<String, Workspace>>,
}

impl WorkspaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &str) -> Option<Workspace> {
        self.workspaces.read().await.get(id).cloned()
    }

    pub async fn save(&self, workspace: Workspace) {
        self.workspaces
            .write()
            .await
            .insert(workspace.id.clone(), workspace);
    }

    pub async fn delete(&self, id: &str) -> CoreResult<()> {
        self.workspaces
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CoreError::NotFound(format!("workspace {id}")))
    }

    pub async fn list(&self) -> Vec<Workspace> {
        let mut workspaces: Vec<Workspace> = self.workspaces.read().await.values().cloned().collect();
        workspaces.sort_by_key(|w| w.created_at);
        workspaces
    }
}
