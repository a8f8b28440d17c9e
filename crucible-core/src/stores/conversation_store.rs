use std::collections::HashMap;

use chrono::{DateTime, Utc};
use crucible_types::Conversation;
use tokio::sync::RwLock;

use crate::error::{CoreError, CoreResult};

struct ConversationRecord {
    workspace_id: String,
    created_at: DateTime<Utc>,
    conversation: Conversation,
}

/// Keyed by agent id; append-only within a run (§3 Conversation).
#[derive(Default)]
pub struct ConversationStore {
    conversations: RwLock<HashMap<String, ConversationRecord>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, agent_id: &str) -> Option<Conversation> {
        self.conversations
            .read()
            .await
            .get(agent_id)
            .map(|r| r.conversation.clone())
    }

    pub async fn ensure(&self, agent_id: &str, workspace_id: &str) {
        let mut conversations = self.conversations.write().await;
        conversations
            .entry(agent_id.to_string())
            .or_insert_with(|| ConversationRecord {
                workspace_id: workspace_id.to_string(),
                created_at: Utc::now(),
                conversation: Conversation::new(),
            });
    }

    pub async fn save(&self, agent_id: &str, conversation: Conversation) -> CoreResult<()> {
        let mut conversations = self.conversations.write().await;
        let record = conversations
            .get_mut(agent_id)
            .ok_or_else(|| CoreError::NotFound(format!("conversation {agent_id}")))?;
        record.conversation = conversation;
        Ok(())
    }

    pub async fn delete(&self, agent_id: &str) -> CoreResult<()> {
        self.conversations
            .write()
            .await
            .remove(agent_id)
            .map(|_| ())
            .ok_or_else(|| CoreError::NotFound(format!("conversation {agent_id}")))
    }

    pub async fn list(&self, workspace_id: &str) -> Vec<(String, Conversation)> {
        let conversations = self.conversations.read().await;
        let mut entries: Vec<_> = conversations
            .iter()
            .filter(|(_, r)| r.workspace_id == workspace_id)
            .map(|(id, r)| (id.clone(), r.created_at, r.conversation.clone()))
            .collect();
        entries.sort_by_key(|(_, created_at, _)| *created_at);
        entries.into_iter().map(|(id, _, c)| (id, c)).collect()
    }
}
