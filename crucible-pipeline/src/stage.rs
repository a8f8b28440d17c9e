use async_trait::async_trait;
use crucible_resilience::RetryPolicy;
use crucible_types::AgentException;

use crate::context::PipelineContext;

/// The boundary result the caller of a pipeline run sees (§7).
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Success { task_summaries: Vec<String> },
    NoTasks { plan_output: String },
    MaxWavesReached { waves: u32, task_summaries: Vec<String> },
    Failed { message: String },
    Cancelled,
}

/// Control-flow signal a stage returns to the engine (§4.7).
#[derive(Debug, Clone)]
pub enum StageResult {
    Continue,
    SkipRemaining(PipelineOutcome),
    RepeatPipeline(Option<String>),
    Done(PipelineOutcome),
    Failed(String),
}

/// One unit of pipeline work. `retry_policy` is consulted by
/// `executeStageWithResilience`; stages with no declared policy run once.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    async fn execute(&self, ctx: &PipelineContext) -> Result<StageResult, AgentException>;
}
