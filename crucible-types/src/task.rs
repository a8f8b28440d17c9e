use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskVerdict {
    Unverified,
    Approved,
    NeedsFix,
}

/// Capped accumulated result text; §3 calls for a bounded `result` field.
pub const TASK_RESULT_CAP: usize = 8_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub objective: String,
    pub scope: Vec<String>,
    pub definition_of_done: Vec<String>,
    pub verification_hints: Vec<String>,
    pub status: TaskStatus,
    pub verdict: TaskVerdict,
    pub dependencies: Vec<String>,
    pub assigned_agent: Option<String>,
    pub result: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        id: String,
        title: impl Into<String>,
        objective: impl Into<String>,
        dependencies: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: title.into(),
            objective: objective.into(),
            scope: Vec::new(),
            definition_of_done: Vec::new(),
            verification_hints: Vec::new(),
            status: TaskStatus::Pending,
            verdict: TaskVerdict::Unverified,
            dependencies,
            assigned_agent: None,
            result: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A task is ready iff every dependency id is not present, i.e. the
    /// caller must supply the completed-id set; see
    /// [`Task::is_ready_given`].
    pub fn is_ready_given(&self, completed_ids: &std::collections::HashSet<String>) -> bool {
        self.status == TaskStatus::Pending
            && self.dependencies.iter().all(|d| completed_ids.contains(d))
    }

    pub fn append_result(&mut self, text: &str) {
        self.result.push_str(text);
        if self.result.len() > TASK_RESULT_CAP {
            let cut = self.result.len() - TASK_RESULT_CAP;
            self.result.drain(0..cut);
        }
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionReport {
    pub agent_id: String,
    pub task_id: String,
    pub summary: String,
    pub files_modified: Vec<String>,
    pub success: bool,
}

impl CompletionReport {
    /// Synthesized when an agent never calls `report_to_parent` and the
    /// fallback text parser itself fails to parse a report (§9 open
    /// question: report-parsing fallback).
    pub fn synthesize_failure(agent_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            task_id: task_id.into(),
            summary: String::from("agent produced no parseable completion report"),
            files_modified: Vec::new(),
            success: false,
        }
    }
}
