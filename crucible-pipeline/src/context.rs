use std::collections::HashMap;
use std::sync::Arc;

use crucible_core::budget::Budget;
use crucible_core::cancellation::CancellationHandle;
use crucible_core::config::EngineConfig;
use crucible_core::stores::Stores;
use crucible_orchestrator::{Coordinator, ReportParser, TaskBlockParser};
use crucible_providers::router::CapabilityRouter;
use crucible_types::ChunkSink;
use tokio::sync::RwLock;

use crate::event_bridge::PipelineEventBus;

/// Named phase-change notifications a stage emits for observer-facing UI
/// state (§4.7 default stages: `PlanReady`, `TasksRegistered(count)`,
/// `WaveStarting`, `CrafterRunning`/`CrafterCompleted`,
/// `VerificationStarting`/`VerificationCompleted`). Distinct from the
/// pipeline-event bus, which only carries the generic stage lifecycle.
pub type PhaseSink = Arc<dyn Fn(&str, serde_json::Value) + Send + Sync>;

/// Well-known metadata keys inter-stage communication relies on (§4.7).
pub const KEY_PLAN_OUTPUT: &str = "planOutput";
pub const KEY_TASK_IDS: &str = "taskIds";
pub const KEY_COORDINATOR_AGENT_ID: &str = "coordinatorAgentId";
pub const KEY_WAVE_NUMBER: &str = "waveNumber";
pub const KEY_DELEGATIONS: &str = "delegations";
pub const KEY_ITERATION: &str = "iteration";
/// Metadata key a stage reads instead of threading a `Budget` parameter
/// through its own signature (§4.7 supplement: Budget tracking).
pub const KEY_BUDGET: &str = "budget";

/// Immutable configuration plus a mutable string-keyed metadata map for
/// inter-stage communication (§4.7). One context per orchestration run.
pub struct PipelineContext {
    pub pipeline_id: String,
    pub workspace_id: String,
    pub user_request: String,
    pub parallel_crafters: bool,
    pub config: EngineConfig,
    pub stores: Arc<Stores>,
    pub router: Arc<CapabilityRouter>,
    pub coordinator: Arc<Coordinator>,
    pub task_parser: Arc<dyn TaskBlockParser>,
    pub report_parser: Arc<dyn ReportParser>,
    pub events: Arc<PipelineEventBus>,
    pub chunk_sink: ChunkSink,
    pub phase_sink: PhaseSink,
    pub cancel: CancellationHandle,
    metadata: RwLock<HashMap<String, serde_json::Value>>,
    budget: RwLock<Budget>,
}

impl PipelineContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pipeline_id: impl Into<String>,
        workspace_id: impl Into<String>,
        user_request: impl Into<String>,
        parallel_crafters: bool,
        config: EngineConfig,
        stores: Arc<Stores>,
        router: Arc<CapabilityRouter>,
        coordinator: Arc<Coordinator>,
        task_parser: Arc<dyn TaskBlockParser>,
        report_parser: Arc<dyn ReportParser>,
        events: Arc<PipelineEventBus>,
        chunk_sink: ChunkSink,
        phase_sink: PhaseSink,
        cancel: CancellationHandle,
    ) -> Self {
        let budget = Budget::from_config(&config);
        Self {
            pipeline_id: pipeline_id.into(),
            workspace_id: workspace_id.into(),
            user_request: user_request.into(),
            parallel_crafters,
            config,
            stores,
            router,
            coordinator,
            task_parser,
            report_parser,
            events,
            chunk_sink,
            phase_sink,
            cancel,
            metadata: RwLock::new(HashMap::new()),
            budget: RwLock::new(budget),
        }
    }

    pub async fn set_meta(&self, key: &str, value: serde_json::Value) {
        self.metadata.write().await.insert(key.to_string(), value);
    }

    pub async fn get_meta(&self, key: &str) -> Option<serde_json::Value> {
        self.metadata.read().await.get(key).cloned()
    }

    pub async fn get_meta_string(&self, key: &str) -> Option<String> {
        self.get_meta(key)
            .await
            .and_then(|v| v.as_str().map(|s| s.to_string()))
    }

    /// Snapshot of the current budget state.
    pub async fn budget(&self) -> Budget {
        self.budget.read().await.clone()
    }

    /// Records one pipeline iteration and refreshes the `KEY_BUDGET`
    /// metadata entry so stages can read it without a typed parameter.
    pub async fn record_iteration(&self) {
        let snapshot = {
            let mut budget = self.budget.write().await;
            budget.record_iteration();
            budget.clone()
        };
        self.set_meta(KEY_BUDGET, serde_json::to_value(&snapshot).unwrap_or_default())
            .await;
    }

    /// Records one sub-agent run (a crafter or verifier invocation) and
    /// refreshes the `KEY_BUDGET` metadata entry.
    pub async fn record_subagent_run(&self) {
        let snapshot = {
            let mut budget = self.budget.write().await;
            budget.record_subagent_run();
            budget.clone()
        };
        self.set_meta(KEY_BUDGET, serde_json::to_value(&snapshot).unwrap_or_default())
            .await;
    }

    pub async fn budget_exceeded(&self) -> bool {
        self.budget.read().await.is_exceeded()
    }
}

/// Raised at a suspension point when the parent cancellation handle is set
/// (§4.7: "Stages must call `ensureActive(ctx)` before any long operation").
#[derive(Debug, thiserror::Error)]
#[error("pipeline cancelled")]
pub struct CancelledError;

pub fn ensure_active(ctx: &PipelineContext) -> Result<(), CancelledError> {
    if ctx.cancel.is_cancelled() {
        return Err(CancelledError);
    }
    Ok(())
}
