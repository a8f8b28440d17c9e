use async_trait::async_trait;
use crucible_orchestrator::Delegation;
use crucible_resilience::RetryPolicy;
use crucible_types::{AgentException, AgentRole, AgentStatus, ErrorCategory};
use serde_json::json;
use std::time::Duration;

use crate::context::{ensure_active, PipelineContext, KEY_DELEGATIONS, KEY_WAVE_NUMBER};
use crate::stage::{PipelineOutcome, Stage, StageResult};

/// Runs one wave of implementors (§4.7).
pub struct CrafterExecutionStage;

#[async_trait]
impl Stage for CrafterExecutionStage {
    fn name(&self) -> &str {
        "crafter-execution"
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(RetryPolicy::new(2, Duration::from_secs(2), 2.0))
    }

    async fn execute(&self, ctx: &PipelineContext) -> Result<StageResult, AgentException> {
        ensure_active(ctx).map_err(|_| cancelled())?;

        let wave = ctx
            .get_meta(KEY_WAVE_NUMBER)
            .await
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
            + 1;
        ctx.set_meta(KEY_WAVE_NUMBER, json!(wave)).await;
        (ctx.phase_sink)("WaveStarting", json!({ "wave": wave }));

        let delegations = ctx
            .coordinator
            .execute_next_wave(&ctx.workspace_id)
            .await
            .map_err(|e| AgentException::new(ErrorCategory::Unknown, "coordinator", e.to_string()))?;

        ctx.set_meta(
            KEY_DELEGATIONS,
            json!(delegations
                .iter()
                .map(|d| json!({ "agentId": d.agent_id, "taskId": d.task_id }))
                .collect::<Vec<_>>()),
        )
        .await;

        if delegations.is_empty() {
            if ctx.coordinator.phase().await == crucible_types::CoordinationPhase::Completed {
                let summaries = task_summaries(ctx).await;
                return Ok(StageResult::SkipRemaining(PipelineOutcome::Success {
                    task_summaries: summaries,
                }));
            }
            return Ok(StageResult::Continue);
        }

        if ctx.parallel_crafters && delegations.len() >= 2 {
            let runs = delegations
                .iter()
                .map(|d| run_one(ctx, d))
                .collect::<Vec<_>>();
            let results = futures::future::join_all(runs).await;
            for result in results {
                result?;
            }
        } else {
            for delegation in &delegations {
                run_one(ctx, delegation).await?;
            }
        }

        Ok(StageResult::Continue)
    }
}

async fn run_one(ctx: &PipelineContext, delegation: &Delegation) -> Result<(), AgentException> {
    (ctx.phase_sink)(
        "CrafterRunning",
        json!({ "agentId": delegation.agent_id, "taskId": delegation.task_id }),
    );

    let prompt = ctx
        .coordinator
        .build_agent_context(&delegation.agent_id)
        .await
        .map_err(|e| AgentException::new(ErrorCategory::Unknown, &delegation.agent_id, e.to_string()))?;

    let provider = ctx
        .router
        .select_provider(AgentRole::Implementor)
        .await
        .map_err(|e| AgentException::new(ErrorCategory::Configuration, &delegation.agent_id, e.to_string()))?;

    ctx.record_subagent_run().await;
    let sink = ctx.chunk_sink.clone();
    let run_result = provider
        .run_streaming(AgentRole::Implementor, &delegation.agent_id, &prompt, sink)
        .await;

    let raw_text = match run_result {
        Ok(text) => text,
        Err(err) => {
            let _ = provider.cleanup(&delegation.agent_id).await;
            return Err(AgentException::new(
                ErrorCategory::Provider,
                &delegation.agent_id,
                err.message(),
            ));
        }
    };

    let agent = ctx.stores.agents.get(&delegation.agent_id).await;
    if agent.map(|a| a.status != AgentStatus::Completed).unwrap_or(true) {
        ctx.coordinator
            .report_or_synthesize(
                &delegation.agent_id,
                &delegation.task_id,
                &raw_text,
                ctx.report_parser.as_ref(),
            )
            .await
            .map_err(|e| AgentException::new(ErrorCategory::Unknown, &delegation.agent_id, e.to_string()))?;
    }

    let _ = provider.cleanup(&delegation.agent_id).await;
    (ctx.phase_sink)(
        "CrafterCompleted",
        json!({ "agentId": delegation.agent_id, "taskId": delegation.task_id }),
    );
    Ok(())
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
