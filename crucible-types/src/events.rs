use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{CompletionReport, TaskStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    AgentCreated {
        agent_id: String,
        timestamp: DateTime<Utc>,
    },
    AgentStatusChanged {
        agent_id: String,
        old_status: String,
        new_status: String,
        timestamp: DateTime<Utc>,
    },
    AgentCompleted {
        report: CompletionReport,
        timestamp: DateTime<Utc>,
    },
    TaskDelegated {
        agent_id: String,
        task_id: String,
        timestamp: DateTime<Utc>,
    },
    TaskStatusChanged {
        task_id: String,
        new_status: TaskStatus,
        timestamp: DateTime<Utc>,
    },
    MessageReceived {
        agent_id: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::AgentCreated { timestamp, .. }
            | DomainEvent::AgentStatusChanged { timestamp, .. }
            | DomainEvent::AgentCompleted { timestamp, .. }
            | DomainEvent::TaskDelegated { timestamp, .. }
            | DomainEvent::TaskStatusChanged { timestamp, .. }
            | DomainEvent::MessageReceived { timestamp, .. } => *timestamp,
        }
    }

    /// All variants are critical (retained for replay) except
    /// `MessageReceived` (§3 Domain event).
    pub fn is_critical(&self) -> bool {
        !matches!(self, DomainEvent::MessageReceived { .. })
    }
}

/// Tagged over Continue/SkipRemaining/RepeatPipeline/Done/Failed at the
/// stage-result layer; pipeline events are a distinct, separately-scoped
/// topic (§4.7 Pipeline event bridge, never mixed into the agent event bus).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    PipelineStarted {
        pipeline_id: String,
        timestamp: DateTime<Utc>,
    },
    PipelineCompleted {
        pipeline_id: String,
        success: bool,
        timestamp: DateTime<Utc>,
    },
    PipelineCancelled {
        pipeline_id: String,
        timestamp: DateTime<Utc>,
    },
    IterationStarted {
        pipeline_id: String,
        iteration: u32,
        timestamp: DateTime<Utc>,
    },
    StageStarted {
        pipeline_id: String,
        stage: String,
        timestamp: DateTime<Utc>,
    },
    StageCompleted {
        pipeline_id: String,
        stage: String,
        result: String,
        timestamp: DateTime<Utc>,
    },
    StageFailed {
        pipeline_id: String,
        stage: String,
        error: String,
        attempt: u32,
        will_retry: bool,
        timestamp: DateTime<Utc>,
    },
    StageSkipped {
        pipeline_id: String,
        stage: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    pub fn pipeline_id(&self) -> &str {
        match self {
            PipelineEvent::PipelineStarted { pipeline_id, .. }
            | PipelineEvent::PipelineCompleted { pipeline_id, .. }
            | PipelineEvent::PipelineCancelled { pipeline_id, .. }
            | PipelineEvent::IterationStarted { pipeline_id, .. }
            | PipelineEvent::StageStarted { pipeline_id, .. }
            | PipelineEvent::StageCompleted { pipeline_id, .. }
            | PipelineEvent::StageFailed { pipeline_id, .. }
            | PipelineEvent::StageSkipped { pipeline_id, .. } => pipeline_id,
        }
    }
}
