use async_trait::async_trait;
use crucible_resilience::RetryPolicy;
use crucible_types::{AgentException, ErrorCategory, Task};
use serde_json::json;

use crate::context::{ensure_active, PipelineContext, KEY_PLAN_OUTPUT, KEY_TASK_IDS};
use crate::stage::{PipelineOutcome, Stage, StageResult};

/// Extracts structured task blocks from `planOutput`, validates the DAG,
/// and stores tasks (§4.7).
pub struct TaskRegistrationStage;

#[async_trait]
impl Stage for TaskRegistrationStage {
    fn name(&self) -> &str {
        "task-registration"
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    async fn execute(&self, ctx: &PipelineContext) -> Result<StageResult, AgentException> {
        ensure_active(ctx).map_err(|_| cancelled())?;

        let plan_output = ctx.get_meta_string(KEY_PLAN_OUTPUT).await.unwrap_or_default();
        let blocks = ctx.task_parser.parse(&plan_output);

        if blocks.is_empty() {
            return Ok(StageResult::SkipRemaining(PipelineOutcome::NoTasks {
                plan_output,
            }));
        }

        let mut id_by_title = std::collections::HashMap::new();
        let mut ids = Vec::new();
        for block in &blocks {
            let id = uuid::Uuid::new_v4().to_string();
            id_by_title.insert(block.title.clone(), id.clone());
            ids.push(id);
        }

        for (block, id) in blocks.iter().zip(ids.iter()) {
            let dependencies = block
                .dependencies
                .iter()
                .filter_map(|title| id_by_title.get(title).cloned())
                .collect::<Vec<_>>();
            let mut task = Task::new(id.clone(), block.title.clone(), block.objective.clone(), dependencies);
            task.scope = block.scope.clone();
            task.definition_of_done = block.definition_of_done.clone();
            task.verification_hints = block.verification_hints.clone();
            ctx.stores
                .register_task(task)
                .await
                .map_err(|e| AgentException::new(ErrorCategory::Configuration, "registration", e.to_string()))?;
        }

        ctx.set_meta(KEY_TASK_IDS, json!(ids)).await;
        (ctx.phase_sink)("TasksRegistered", json!({ "count": ids.len() }));

        Ok(StageResult::Continue)
    }
}

fn cancelled() -> AgentException {
    AgentException::new(ErrorCategory::Unknown, "pipeline", "cancelled")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PipelineContext;
    use crate::event_bridge::PipelineEventBus;
    use crucible_core::cancellation::CancellationHandle;
    use crucible_core::config::EngineConfig;
    use crucible_core::event_bus::EventBus;
    use crucible_core::stores::Stores;
    use crucible_orchestrator::{Coordinator, DefaultReportParser, DefaultTaskBlockParser};
    use crucible_providers::router::CapabilityRouter;
    use std::sync::Arc;

    async fn make_ctx(plan: &str) -> PipelineContext {
        let stores = Arc::new(Stores::new(EventBus::new()));
        let ctx = PipelineContext::new(
            "p1",
            "ws",
            "do it",
            false,
            EngineConfig::default(),
            stores.clone(),
            Arc::new(CapabilityRouter::new()),
            Arc::new(Coordinator::new(stores, "ws")),
            Arc::new(DefaultTaskBlockParser),
            Arc::new(DefaultReportParser),
            Arc::new(PipelineEventBus::new()),
            Arc::new(|_, _| {}),
            Arc::new(|_, _| {}),
            CancellationHandle::new(),
        );
        ctx.set_meta(KEY_PLAN_OUTPUT, json!(plan.to_string())).await;
        ctx
    }

    #[tokio::test]
    async fn no_task_blocks_yields_no_tasks_outcome() {
        let ctx = make_ctx("").await;
        let result = TaskRegistrationStage.execute(&ctx).await.unwrap();
        assert!(matches!(
            result,
            StageResult::SkipRemaining(PipelineOutcome::NoTasks { .. })
        ));
    }

    #[tokio::test]
    async fn single_block_registers_one_task() {
        let ctx = make_ctx(
            "@@@task\n# Add login endpoint\n## Objective\nbuild it\n@@@",
        )
        .await;
        let result = TaskRegistrationStage.execute(&ctx).await.unwrap();
        assert!(matches!(result, StageResult::Continue));
        let ids = ctx.get_meta(KEY_TASK_IDS).await.unwrap();
        assert_eq!(ids.as_array().unwrap().len(), 1);
    }
}
