use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    ToolCall,
    ToolResult,
    Thinking,
    Info,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub tool_call_id: Option<String>,
    pub tool_status: Option<String>,
    pub tool_kind: Option<String>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_call_id: None,
            tool_status: None,
            tool_kind: None,
        }
    }
}

/// Append-only within a run; ordering is the append order (monotonic
/// timestamp on each message).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Last `n` messages, each content truncated, for the session-recovery
    /// wrapper (§4.4: last 20 messages, 500 chars each).
    pub fn tail_truncated(&self, n: usize, max_chars: usize) -> Vec<Message> {
        let start = self.messages.len().saturating_sub(n);
        self.messages[start..]
            .iter()
            .map(|m| {
                let mut m = m.clone();
                if m.content.len() > max_chars {
                    m.content.truncate(max_chars);
                }
                m
            })
            .collect()
    }
}
