use async_trait::async_trait;
use crucible_resilience::RetryPolicy;
use crucible_types::{AgentException, AgentRole, ErrorCategory, TaskStatus, TaskVerdict};
use serde_json::json;

use crate::context::{ensure_active, PipelineContext, KEY_COORDINATOR_AGENT_ID, KEY_DELEGATIONS, KEY_ITERATION};
use crate::stage::{PipelineOutcome, Stage, StageResult};

/// Verifies the tasks completed in the current wave and sets their verdict
/// (§4.7).
pub struct GateVerificationStage;

#[async_trait]
impl Stage for GateVerificationStage {
    fn name(&self) -> &str {
        "gate-verification"
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    async fn execute(&self, ctx: &PipelineContext) -> Result<StageResult, AgentException> {
        ensure_active(ctx).map_err(|_| cancelled())?;
        (ctx.phase_sink)("VerificationStarting", json!({}));

        let delegations = ctx
            .get_meta(KEY_DELEGATIONS)
            .await
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();
        let task_ids: Vec<String> = delegations
            .iter()
            .filter_map(|d| d.get("taskId").and_then(|v| v.as_str()).map(|s| s.to_string()))
            .collect();

        if task_ids.is_empty() {
            (ctx.phase_sink)("VerificationCompleted", json!({}));
            return Ok(StageResult::Done(PipelineOutcome::Success {
                task_summaries: task_summaries(ctx).await,
            }));
        }

        let mut prompt = String::from("Verify the following completed tasks:\n\n");
        for id in &task_ids {
            if let Some(task) = ctx.stores.tasks.get(id).await {
                prompt.push_str(&format!("- {}: {}\n", task.title, task.result));
            }
        }

        let verifier_agent_id = ctx
            .get_meta_string(KEY_COORDINATOR_AGENT_ID)
            .await
            .unwrap_or_else(|| "verifier".to_string());

        let provider = ctx
            .router
            .select_provider(AgentRole::Verifier)
            .await
            .map_err(|e| AgentException::new(ErrorCategory::Configuration, &verifier_agent_id, e.to_string()))?;

        ctx.record_subagent_run().await;
        let sink = ctx.chunk_sink.clone();
        let verdict_text = provider
            .run_streaming(AgentRole::Verifier, &verifier_agent_id, &prompt, sink)
            .await
            .map_err(|e| AgentException::new(ErrorCategory::Provider, &verifier_agent_id, e.message()))?;

        let approved = verdict_text.to_uppercase().contains("APPROVED")
            && !verdict_text.to_uppercase().contains("NEEDS FIX");
        let verdict = if approved { TaskVerdict::Approved } else { TaskVerdict::NeedsFix };

        match ctx.coordinator.try_advance_to_verifying().await {
            Ok(true) => {}
            Ok(false) => {
                return Err(AgentException::new(
                    ErrorCategory::Unknown,
                    "coordinator",
                    "verification requested before every wave task reached Completed",
                ));
            }
            Err(e) => {
                return Err(AgentException::new(ErrorCategory::Unknown, "coordinator", e.to_string()));
            }
        }

        let mut any_needs_fix = false;
        for id in &task_ids {
            ctx.stores
                .set_task_verdict(id, verdict)
                .await
                .map_err(|e| AgentException::new(ErrorCategory::Unknown, id, e.to_string()))?;
            if verdict == TaskVerdict::NeedsFix {
                any_needs_fix = true;
                ctx.stores
                    .change_task_status(id, TaskStatus::Ready)
                    .await
                    .map_err(|e| AgentException::new(ErrorCategory::Unknown, id, e.to_string()))?;
            }
        }

        (ctx.phase_sink)("VerificationCompleted", json!({ "approved": !any_needs_fix }));

        let iteration = ctx
            .get_meta(KEY_ITERATION)
            .await
            .and_then(|v| v.as_u64())
            .unwrap_or(1) as u32;
        ctx.coordinator
            .record_verification_outcome(iteration, ctx.config.max_iterations)
            .await
            .map_err(|e| AgentException::new(ErrorCategory::Unknown, "coordinator", e.to_string()))?;

        if any_needs_fix {
            return Ok(StageResult::RepeatPipeline(Some("crafter-execution".to_string())));
        }

        Ok(StageResult::Done(PipelineOutcome::Success {
            task_summaries: task_summaries(ctx).await,
        }))
    }
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

fn cancelled() -> AgentException {
    AgentException::new(ErrorCategory::Unknown, "pipeline", "cancelled")
}
