use serde::{Deserialize, Serialize};

use crate::task::CompletionReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingPhase {
    Start,
    Chunk,
    End,
}

/// Canonical four-state tool-call lifecycle every provider must map its
/// own status vocabulary onto (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Started,
    InProgress,
    Completed,
    Failed,
}

impl ToolCallStatus {
    /// Ordered lowercase substring match against an external status string.
    /// Order matters: `start` and `complet` are checked before `fail`/
    /// `error`, so `"completion_error"` resolves to `Completed`, not
    /// `Failed`. Preserve this literally (§9 open question).
    pub fn from_external(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        if lower.contains("start") {
            ToolCallStatus::Started
        } else if lower.contains("complet") {
            ToolCallStatus::Completed
        } else if lower.contains("fail") || lower.contains("error") {
            ToolCallStatus::Failed
        } else {
            ToolCallStatus::InProgress
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Text {
        content: String,
    },
    Thinking {
        phase: ThinkingPhase,
        content: String,
    },
    ToolCall {
        name: String,
        status: ToolCallStatus,
        args: Option<serde_json::Value>,
        result: Option<serde_json::Value>,
    },
    Heartbeat {
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    Error {
        message: String,
        recoverable: bool,
    },
    Completed {
        stop_reason: String,
        token_count: Option<u64>,
    },
    CompletionReport {
        report: CompletionReport,
    },
}

impl StreamChunk {
    pub fn heartbeat() -> Self {
        StreamChunk::Heartbeat {
            timestamp: chrono::Utc::now(),
        }
    }

    /// Non-critical chunks a slow sink is allowed to drop under backpressure
    /// (§9 Streaming sinks: heartbeats may be dropped, nothing else).
    pub fn is_droppable(&self) -> bool {
        matches!(self, StreamChunk::Heartbeat { .. })
    }
}

/// A sink is a callback from `(agent_id, chunk)` to unit; back-pressure is
/// the sink's own responsibility (§9).
pub type ChunkSink = std::sync::Arc<dyn Fn(&str, StreamChunk) + Send + Sync>;
