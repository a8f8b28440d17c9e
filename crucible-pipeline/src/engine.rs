use chrono::Utc;
use crucible_types::{AgentException, AgentStatus, ErrorCategory, PipelineEvent, TaskStatus};
use serde_json::json;
use tracing::Instrument;

use crate::context::{PipelineContext, KEY_ITERATION, KEY_WAVE_NUMBER};
use crate::stage::{PipelineOutcome, Stage, StageResult};

/// What to do once a stage's retries (if any) are exhausted (§4.7
/// `executeStageWithResilience`).
pub enum RecoveryDecision {
    Skip(String),
    Fallback(StageResult),
    Abort,
}

pub trait StageRecoveryHandler: Send + Sync {
    fn decide(&self, stage_name: &str, error: &AgentException) -> RecoveryDecision;
}

/// Skip on I/O and timeout-shaped errors, abort otherwise (§4.7 default
/// handler).
pub struct DefaultStageRecoveryHandler;

impl StageRecoveryHandler for DefaultStageRecoveryHandler {
    fn decide(&self, _stage_name: &str, error: &AgentException) -> RecoveryDecision {
        match error.category {
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Process => {
                RecoveryDecision::Skip(format!("{:?} error treated as skippable", error.category))
            }
            _ => RecoveryDecision::Abort,
        }
    }
}

/// Substrings the default retryable predicate matches, in addition to any
/// category already known recoverable (§4.7).
const RETRYABLE_SUBSTRINGS: &[&str] = &["timeout", "connection", "rate limit", "503", "429"];

fn is_retryable(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_SUBSTRINGS.iter().any(|s| lower.contains(s))
}

/// Composable ordered list of stages driving one orchestration run (§4.7).
pub struct PipelineEngine {
    stages: Vec<Box<dyn Stage>>,
    recovery: Box<dyn StageRecoveryHandler>,
}

impl PipelineEngine {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages,
            recovery: Box::new(DefaultStageRecoveryHandler),
        }
    }

    pub fn with_recovery_handler(stages: Vec<Box<dyn Stage>>, recovery: Box<dyn StageRecoveryHandler>) -> Self {
        Self { stages, recovery }
    }

    async fn execute_stage_with_resilience(&self, stage: &dyn Stage, ctx: &PipelineContext) -> StageResult {
        let policy = stage.retry_policy();
        let max_attempts = policy.map(|p| p.max_attempts).unwrap_or(1).max(1);
        let mut attempt = 1u32;

        loop {
            match stage.execute(ctx).await {
                Ok(result) => return result,
                Err(err) => {
                    let cancellation = ctx.cancel.is_cancelled();
                    let retryable = !cancellation && err.category.recoverable() && is_retryable(&err.message);

                    if retryable && attempt < max_attempts {
                        let policy = policy.expect("max_attempts > 1 implies a policy");
                        let delay = policy.delay_for_attempt(attempt);
                        ctx.events
                            .emit(PipelineEvent::StageFailed {
                                pipeline_id: ctx.pipeline_id.clone(),
                                stage: stage.name().to_string(),
                                error: err.message.clone(),
                                attempt,
                                will_retry: true,
                                timestamp: Utc::now(),
                            })
                            .await;
                        tracing::warn!(stage = stage.name(), attempt, "stage failed, retrying");
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = ctx.cancel.cancelled() => {
                                return StageResult::Continue;
                            }
                        }
                        attempt += 1;
                        continue;
                    }

                    ctx.events
                        .emit(PipelineEvent::StageFailed {
                            pipeline_id: ctx.pipeline_id.clone(),
                            stage: stage.name().to_string(),
                            error: err.message.clone(),
                            attempt,
                            will_retry: false,
                            timestamp: Utc::now(),
                        })
                        .await;

                    if cancellation {
                        return StageResult::Continue;
                    }

                    return match self.recovery.decide(stage.name(), &err) {
                        RecoveryDecision::Skip(reason) => {
                            ctx.events
                                .emit(PipelineEvent::StageSkipped {
                                    pipeline_id: ctx.pipeline_id.clone(),
                                    stage: stage.name().to_string(),
                                    reason,
                                    timestamp: Utc::now(),
                                })
                                .await;
                            StageResult::Continue
                        }
                        RecoveryDecision::Fallback(result) => result,
                        RecoveryDecision::Abort => {
                            tracing::error!(stage = stage.name(), error = %err.message, "stage aborted");
                            StageResult::Failed(err.message)
                        }
                    };
                }
            }
        }
    }

    /// Drives the execution loop described in §4.7.
    pub async fn run(&self, ctx: &PipelineContext) -> PipelineOutcome {
        tracing::info!(pipeline_id = %ctx.pipeline_id, "pipeline started");
        ctx.events
            .emit(PipelineEvent::PipelineStarted {
                pipeline_id: ctx.pipeline_id.clone(),
                timestamp: Utc::now(),
            })
            .await;

        let mut start_index = 0usize;

        for iteration in 1..=ctx.config.max_iterations {
            if ctx.cancel.is_cancelled() {
                return self.cancel_outcome(ctx).await;
            }

            ctx.set_meta(KEY_ITERATION, json!(iteration)).await;
            ctx.record_iteration().await;
            tracing::info!(pipeline_id = %ctx.pipeline_id, iteration, "iteration started");
            ctx.events
                .emit(PipelineEvent::IterationStarted {
                    pipeline_id: ctx.pipeline_id.clone(),
                    iteration,
                    timestamp: Utc::now(),
                })
                .await;

            let mut repeat_from = None;

            for idx in start_index..self.stages.len() {
                if ctx.cancel.is_cancelled() {
                    return self.cancel_outcome(ctx).await;
                }

                let stage = self.stages[idx].as_ref();
                let stage_span = tracing::info_span!("stage", name = stage.name(), iteration);
                ctx.events
                    .emit(PipelineEvent::StageStarted {
                        pipeline_id: ctx.pipeline_id.clone(),
                        stage: stage.name().to_string(),
                        timestamp: Utc::now(),
                    })
                    .await;

                let stage_result = self
                    .execute_stage_with_resilience(stage, ctx)
                    .instrument(stage_span)
                    .await;
                if ctx.cancel.is_cancelled() {
                    return self.cancel_outcome(ctx).await;
                }

                match stage_result {
                    StageResult::Continue => {
                        ctx.events
                            .emit(PipelineEvent::StageCompleted {
                                pipeline_id: ctx.pipeline_id.clone(),
                                stage: stage.name().to_string(),
                                result: "continue".to_string(),
                                timestamp: Utc::now(),
                            })
                            .await;
                    }
                    StageResult::SkipRemaining(outcome) | StageResult::Done(outcome) => {
                        ctx.events
                            .emit(PipelineEvent::StageCompleted {
                                pipeline_id: ctx.pipeline_id.clone(),
                                stage: stage.name().to_string(),
                                result: format!("{outcome:?}"),
                                timestamp: Utc::now(),
                            })
                            .await;
                        ctx.events
                            .emit(PipelineEvent::PipelineCompleted {
                                pipeline_id: ctx.pipeline_id.clone(),
                                success: !matches!(outcome, PipelineOutcome::Failed { .. }),
                                timestamp: Utc::now(),
                            })
                            .await;
                        return outcome;
                    }
                    StageResult::RepeatPipeline(from_stage) => {
                        let resume_idx = from_stage
                            .and_then(|name| self.stages.iter().position(|s| s.name() == name))
                            .unwrap_or(idx);
                        repeat_from = Some(resume_idx);
                        break;
                    }
                    StageResult::Failed(message) => {
                        ctx.events
                            .emit(PipelineEvent::PipelineCompleted {
                                pipeline_id: ctx.pipeline_id.clone(),
                                success: false,
                                timestamp: Utc::now(),
                            })
                            .await;
                        return PipelineOutcome::Failed { message };
                    }
                }
            }

            match repeat_from {
                Some(idx) => {
                    start_index = idx;
                    continue;
                }
                None => {
                    let task_summaries = Self::task_summaries(ctx).await;
                    ctx.events
                        .emit(PipelineEvent::PipelineCompleted {
                            pipeline_id: ctx.pipeline_id.clone(),
                            success: true,
                            timestamp: Utc::now(),
                        })
                        .await;
                    return PipelineOutcome::Success { task_summaries };
                }
            }
        }

        ctx.coordinator.set_max_waves_reached().await;
        let waves = ctx
            .get_meta(KEY_WAVE_NUMBER)
            .await
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let task_summaries = Self::task_summaries(ctx).await;
        ctx.events
            .emit(PipelineEvent::PipelineCompleted {
                pipeline_id: ctx.pipeline_id.clone(),
                success: false,
                timestamp: Utc::now(),
            })
            .await;
        PipelineOutcome::MaxWavesReached { waves, task_summaries }
    }

    /// `stopExecution`: interrupt every known agent regardless of status,
    /// then transition in-flight work to a cancelled-equivalent state
    /// (§5). The task data model has no `Cancelled` status of its own, so
    /// in-flight tasks fall back to `Failed`; agent status does carry a
    /// `Cancelled` variant and is set directly.
    async fn cancel_outcome(&self, ctx: &PipelineContext) -> PipelineOutcome {
        let agents = ctx.stores.agents.list(&ctx.workspace_id).await;
        for agent in &agents {
            ctx.router.interrupt_all(&agent.id).await;
            if agent.status == AgentStatus::Active {
                let _ = ctx.stores.change_agent_status(&agent.id, AgentStatus::Cancelled).await;
            }
        }

        for task in ctx.stores.tasks.list_all().await {
            if matches!(task.status, TaskStatus::Assigned | TaskStatus::InProgress | TaskStatus::Pending) {
                let _ = ctx.stores.change_task_status(&task.id, TaskStatus::Failed).await;
            }
        }

        ctx.events
            .emit(PipelineEvent::PipelineCancelled {
                pipeline_id: ctx.pipeline_id.clone(),
                timestamp: Utc::now(),
            })
            .await;
        PipelineOutcome::Cancelled
    }

    async fn task_summaries(ctx: &PipelineContext) -> Vec<String> {
        ctx.stores
            .tasks
            .list_all()
            .await
            .into_iter()
            .map(|t| t.result)
            .collect()
    }
}
