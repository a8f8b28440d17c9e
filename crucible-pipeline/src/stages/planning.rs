use async_trait::async_trait;
use crucible_resilience::RetryPolicy;
use crucible_types::{Agent, AgentException, AgentRole, ErrorCategory};
use serde_json::json;

use crate::context::{ensure_active, PipelineContext, KEY_COORDINATOR_AGENT_ID, KEY_PLAN_OUTPUT};
use crate::stage::{Stage, StageResult};

/// Invokes the provider in the Coordinator role with the user request;
/// writes the raw text to `planOutput` (§4.7).
pub struct PlanningStage;

#[async_trait]
impl Stage for PlanningStage {
    fn name(&self) -> &str {
        "planning"
    }

    fn description(&self) -> &str {
        "runs the coordinator provider over the user request to produce a plan"
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    async fn execute(&self, ctx: &PipelineContext) -> Result<StageResult, AgentException> {
        ensure_active(ctx).map_err(|_| cancelled())?;

        let agent = Agent::new(
            uuid::Uuid::new_v4().to_string(),
            "coordinator",
            AgentRole::Coordinator,
            &ctx.workspace_id,
            None,
        );
        ctx.stores.create_agent(agent.clone()).await;
        ctx.coordinator
            .start_run(agent.id.clone())
            .await
            .map_err(|e| AgentException::new(ErrorCategory::Unknown, &agent.id, e.to_string()))?;
        ctx.set_meta(KEY_COORDINATOR_AGENT_ID, json!(agent.id)).await;

        let provider = ctx
            .router
            .select_provider(AgentRole::Coordinator)
            .await
            .map_err(|e| AgentException::new(ErrorCategory::Configuration, &agent.id, e.to_string()))?;

        let sink = ctx.chunk_sink.clone();
        let plan_output = provider
            .run_streaming(AgentRole::Coordinator, &agent.id, &ctx.user_request, sink)
            .await
            .map_err(|e| AgentException::new(ErrorCategory::Provider, &agent.id, e.message()))?;

        ctx.set_meta(KEY_PLAN_OUTPUT, json!(plan_output)).await;
        ctx.coordinator
            .planner_finished()
            .await
            .map_err(|e| AgentException::new(ErrorCategory::Unknown, &agent.id, e.to_string()))?;

        (ctx.phase_sink)("PlanReady", json!({}));

        Ok(StageResult::Continue)
    }
}

fn cancelled() -> AgentException {
    AgentException::new(ErrorCategory::Unknown, "pipeline", "cancelled")
}
