use std::collections::HashSet;
use std::sync::Arc;

use crucible_core::stores::Stores;
use crucible_types::{
    Agent, AgentRole, AgentStatus, CompletionReport, CoordinationPhase, CoordinationState, Task,
    TaskStatus, TaskVerdict,
};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::report_parser::ReportParser;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("invalid phase transition: {0:?} -> {1}")]
    InvalidTransition(CoordinationPhase, &'static str),
    #[error(transparent)]
    Store(#[from] crucible_core::error::CoreError),
    #[error("task {0} not found")]
    TaskNotFound(String),
}

/// One `(implementorAgentId, taskId)` pair produced by `execute_next_wave`
/// (§4.6 GLOSSARY: Delegation).
#[derive(Debug, Clone)]
pub struct Delegation {
    pub agent_id: String,
    pub task_id: String,
}

/// Owns the coordination state machine and the mutation policy on the
/// stores (§4.6).
pub struct Coordinator {
    stores: Arc<Stores>,
    state: RwLock<CoordinationState>,
    current_wave_task_ids: RwLock<Vec<String>>,
}

impl Coordinator {
    pub fn new(stores: Arc<Stores>, workspace_id: impl Into<String>) -> Self {
        Self {
            stores,
            state: RwLock::new(CoordinationState::new(workspace_id)),
            current_wave_task_ids: RwLock::new(Vec::new()),
        }
    }

    pub async fn phase(&self) -> CoordinationPhase {
        self.state.read().await.phase
    }

    pub async fn snapshot(&self) -> CoordinationState {
        self.state.read().await.clone()
    }

    async fn transition(&self, expected: &[CoordinationPhase], to: CoordinationPhase) -> Result<(), CoordinatorError> {
        let mut state = self.state.write().await;
        if !expected.contains(&state.phase) {
            return Err(CoordinatorError::InvalidTransition(state.phase, phase_name(to)));
        }
        tracing::info!(from = ?state.phase, to = ?to, "coordination phase transition");
        state.phase = to;
        Ok(())
    }

    /// `Idle -> Planning` on `startRun`.
    pub async fn start_run(&self, coordinator_agent_id: impl Into<String>) -> Result<(), CoordinatorError> {
        {
            let mut state = self.state.write().await;
            state.coordinator_agent_id = Some(coordinator_agent_id.into());
        }
        self.transition(&[CoordinationPhase::Idle], CoordinationPhase::Planning).await
    }

    /// `Planning -> Ready` after the planner returns output.
    pub async fn planner_finished(&self) -> Result<(), CoordinatorError> {
        self.transition(&[CoordinationPhase::Planning], CoordinationPhase::Ready).await
    }

    /// Wave computation (§4.6): select tasks whose status is `Ready` (i.e.
    /// `Pending` with satisfied dependencies) and whose deps are
    /// `Completed`; for each, create an `Implementor` agent, transition the
    /// task to `Assigned` then `InProgress`, emit `TaskDelegated`. Ties
    /// broken by task creation order (`Stores::tasks::list_all` is already
    /// creation-time ascending).
    pub async fn execute_next_wave(&self, workspace_id: &str) -> Result<Vec<Delegation>, CoordinatorError> {
        self.recover_orphans().await?;

        let tasks = self.stores.tasks.list_all().await;
        let completed: HashSet<String> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.id.clone())
            .collect();

        let runnable: Vec<Task> = tasks
            .into_iter()
            .filter(|t| {
                matches!(t.status, TaskStatus::Pending | TaskStatus::Ready)
                    && t.dependencies.iter().all(|d| completed.contains(d))
            })
            .collect();

        let mut delegations = Vec::new();
        let mut wave_task_ids = Vec::new();
        for task in runnable {
            let agent = Agent::new(
                uuid::Uuid::new_v4().to_string(),
                format!("implementor-{}", task.id),
                AgentRole::Implementor,
                workspace_id,
                self.state.read().await.coordinator_agent_id.clone(),
            );
            self.stores.create_agent(agent.clone()).await;
            self.stores.assign_task(&task.id, &agent.id).await?;
            self.stores
                .change_task_status(&task.id, TaskStatus::InProgress)
                .await?;
            self.stores
                .change_agent_status(&agent.id, AgentStatus::Active)
                .await?;
            wave_task_ids.push(task.id.clone());
            delegations.push(Delegation {
                agent_id: agent.id,
                task_id: task.id,
            });
        }

        if !delegations.is_empty() {
            *self.current_wave_task_ids.write().await = wave_task_ids;
            let mut state = self.state.write().await;
            state.current_wave += 1;
            if state.phase == CoordinationPhase::Ready || state.phase == CoordinationPhase::NeedsFix {
                state.phase = CoordinationPhase::Executing;
            }
        }

        Ok(delegations)
    }

    /// Resets `Assigned`/`InProgress` tasks with no owning agent left in
    /// the agent store back to `Ready`, guarding against a task getting
    /// stranded if its agent disappeared mid-run (single process lifetime
    /// only, no cross-restart durability).
    async fn recover_orphans(&self) -> Result<(), CoordinatorError> {
        for task in self.stores.tasks.list_all().await {
            if !matches!(task.status, TaskStatus::Assigned | TaskStatus::InProgress) {
                continue;
            }
            let has_owner = match &task.assigned_agent {
                Some(agent_id) => self.stores.agents.get(agent_id).await.is_some(),
                None => false,
            };
            if !has_owner {
                tracing::warn!(task_id = %task.id, "resetting orphaned task to Ready");
                self.stores.change_task_status(&task.id, TaskStatus::Ready).await?;
            }
        }
        Ok(())
    }

    /// `Executing -> Verifying` once every task in the current wave is
    /// `Completed`.
    pub async fn try_advance_to_verifying(&self) -> Result<bool, CoordinatorError> {
        let wave_ids = self.current_wave_task_ids.read().await.clone();
        if wave_ids.is_empty() {
            return Ok(false);
        }
        for id in &wave_ids {
            let task = self
                .stores
                .tasks
                .get(id)
                .await
                .ok_or_else(|| CoordinatorError::TaskNotFound(id.clone()))?;
            if task.status != TaskStatus::Completed {
                return Ok(false);
            }
        }
        self.transition(&[CoordinationPhase::Executing], CoordinationPhase::Verifying)
            .await?;
        Ok(true)
    }

    /// `Verifying -> NeedsFix` when any verdict is `NeedsFix` and the
    /// iteration budget isn't exhausted; resets those tasks to `Ready`.
    /// `Verifying -> Completed` when all verdicts are `Approved`.
    pub async fn record_verification_outcome(
        &self,
        iteration: u32,
        max_iterations: u32,
    ) -> Result<CoordinationPhase, CoordinatorError> {
        let wave_ids = self.current_wave_task_ids.read().await.clone();
        let mut any_needs_fix = false;
        for id in &wave_ids {
            let task = self
                .stores
                .tasks
                .get(id)
                .await
                .ok_or_else(|| CoordinatorError::TaskNotFound(id.clone()))?;
            if task.verdict == TaskVerdict::NeedsFix {
                any_needs_fix = true;
                self.stores.change_task_status(id, TaskStatus::Ready).await?;
            }
        }

        if any_needs_fix && iteration < max_iterations {
            self.transition(&[CoordinationPhase::Verifying], CoordinationPhase::NeedsFix)
                .await?;
            Ok(CoordinationPhase::NeedsFix)
        } else if !any_needs_fix {
            self.transition(&[CoordinationPhase::Verifying], CoordinationPhase::Completed)
                .await?;
            Ok(CoordinationPhase::Completed)
        } else {
            // Needs fix but the iteration budget is exhausted; the pipeline
            // is responsible for the `MaxWavesReached` outcome, the
            // coordinator just stays in `Verifying` in that edge case so
            // callers can inspect the final per-task verdicts.
            Ok(CoordinationPhase::Verifying)
        }
    }

    /// Any phase can transition to `Failed` on an unrecoverable error.
    pub async fn fail(&self, reason: &str) {
        tracing::error!(reason, "coordinator transitioning to Failed");
        self.state.write().await.phase = CoordinationPhase::Failed;
    }

    pub async fn set_max_waves_reached(&self) {
        self.state.write().await.phase = CoordinationPhase::MaxWavesReached;
    }

    /// Self-contained prompt: objective, scope, definition of done,
    /// verification hints; dependency summaries (only tasks whose result is
    /// non-empty); an identity block (§4.6 Build context).
    pub async fn build_agent_context(&self, agent_id: &str) -> Result<String, CoordinatorError> {
        let tasks = self.stores.tasks.list_all().await;
        let task = tasks
            .iter()
            .find(|t| t.assigned_agent.as_deref() == Some(agent_id))
            .ok_or_else(|| CoordinatorError::TaskNotFound(agent_id.to_string()))?;

        let mut prompt = String::new();
        prompt.push_str(&format!("Objective: {}\n", task.objective));
        if !task.scope.is_empty() {
            prompt.push_str(&format!("Scope: {}\n", task.scope.join("; ")));
        }
        if !task.definition_of_done.is_empty() {
            prompt.push_str(&format!("Definition of done: {}\n", task.definition_of_done.join("; ")));
        }
        if !task.verification_hints.is_empty() {
            prompt.push_str(&format!("Verification hints: {}\n", task.verification_hints.join("; ")));
        }

        for dep_id in &task.dependencies {
            if let Some(dep) = tasks.iter().find(|t| &t.id == dep_id) {
                if !dep.result.is_empty() {
                    prompt.push_str(&format!("Dependency '{}' result: {}\n", dep.title, dep.result));
                }
            }
        }

        prompt.push_str(&format!("\n[identity] agent_id={agent_id} task_id={}\n", task.id));
        Ok(prompt)
    }

    /// The pipeline decides which reporting path applies: if the agent's
    /// status is already `Completed` after the run, do nothing (the native
    /// `report_to_parent` tool handled it); otherwise parse the free-form
    /// text and synthesize a report (§4.6).
    pub async fn report_or_synthesize(
        &self,
        agent_id: &str,
        task_id: &str,
        raw_text: &str,
        parser: &dyn ReportParser,
    ) -> Result<Option<CompletionReport>, CoordinatorError> {
        let agent = self
            .stores
            .agents
            .get(agent_id)
            .await
            .ok_or_else(|| CoordinatorError::TaskNotFound(agent_id.to_string()))?;
        if agent.status == AgentStatus::Completed {
            return Ok(None);
        }

        let report = parser
            .parse(agent_id, task_id, raw_text)
            .unwrap_or_else(|| CompletionReport::synthesize_failure(agent_id, task_id));

        self.apply_report(task_id, &report).await?;
        self.stores.complete_agent(agent_id, report.clone()).await?;
        Ok(Some(report))
    }

    /// Handles a `report_to_parent` tool call: updates the task result,
    /// marks the task `Completed`, marks the agent `Completed`, emits
    /// events (§4.6).
    pub async fn handle_native_report(
        &self,
        agent_id: &str,
        task_id: &str,
        report: CompletionReport,
    ) -> Result<(), CoordinatorError> {
        self.apply_report(task_id, &report).await?;
        self.stores.complete_agent(agent_id, report).await?;
        Ok(())
    }

    async fn apply_report(&self, task_id: &str, report: &CompletionReport) -> Result<(), CoordinatorError> {
        let mut task = self
            .stores
            .tasks
            .get(task_id)
            .await
            .ok_or_else(|| CoordinatorError::TaskNotFound(task_id.to_string()))?;
        task.append_result(&report.summary);
        self.stores.tasks.save(task).await?;
        let status = if report.success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        self.stores.change_task_status(task_id, status).await?;
        Ok(())
    }
}

fn phase_name(phase: CoordinationPhase) -> &'static str {
    match phase {
        CoordinationPhase::Idle => "Idle",
        CoordinationPhase::Planning => "Planning",
        CoordinationPhase::Ready => "Ready",
        CoordinationPhase::Executing => "Executing",
        CoordinationPhase::Verifying => "Verifying",
        CoordinationPhase::NeedsFix => "NeedsFix",
        CoordinationPhase::Completed => "Completed",
        CoordinationPhase::Failed => "Failed",
        CoordinationPhase::MaxWavesReached => "MaxWavesReached",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_core::event_bus::EventBus;
    use crucible_types::Task;

    fn make_stores() -> Arc<Stores> {
        Arc::new(Stores::new(EventBus::new()))
    }

    #[tokio::test]
    async fn full_happy_path_phase_sequence() {
        let stores = make_stores();
        stores
            .register_task(Task::new("t1".into(), "title", "obj", vec![]))
            .await
            .unwrap();
        let coordinator = Coordinator::new(stores.clone(), "ws");
        coordinator.start_run("coord-1").await.unwrap();
        assert_eq!(coordinator.phase().await, CoordinationPhase::Planning);
        coordinator.planner_finished().await.unwrap();
        assert_eq!(coordinator.phase().await, CoordinationPhase::Ready);

        let delegations = coordinator.execute_next_wave("ws").await.unwrap();
        assert_eq!(delegations.len(), 1);
        assert_eq!(coordinator.phase().await, CoordinationPhase::Executing);

        let agent_id = delegations[0].agent_id.clone();
        coordinator
            .handle_native_report(
                &agent_id,
                "t1",
                CompletionReport {
                    agent_id: agent_id.clone(),
                    task_id: "t1".into(),
                    summary: "done".into(),
                    files_modified: vec![],
                    success: true,
                },
            )
            .await
            .unwrap();

        assert!(coordinator.try_advance_to_verifying().await.unwrap());
        stores.set_task_verdict("t1", TaskVerdict::Approved).await.unwrap();
        let phase = coordinator.record_verification_outcome(1, 3).await.unwrap();
        assert_eq!(phase, CoordinationPhase::Completed);
    }

    #[tokio::test]
    async fn needs_fix_resets_task_and_returns_to_executing_next_wave() {
        let stores = make_stores();
        stores
            .register_task(Task::new("t1".into(), "title", "obj", vec![]))
            .await
            .unwrap();
        let coordinator = Coordinator::new(stores.clone(), "ws");
        coordinator.start_run("coord-1").await.unwrap();
        coordinator.planner_finished().await.unwrap();
        let delegations = coordinator.execute_next_wave("ws").await.unwrap();
        let agent_id = delegations[0].agent_id.clone();
        stores
            .change_task_status("t1", TaskStatus::Completed)
            .await
            .unwrap();
        coordinator.try_advance_to_verifying().await.unwrap();
        stores.set_task_verdict("t1", TaskVerdict::NeedsFix).await.unwrap();

        let phase = coordinator.record_verification_outcome(1, 3).await.unwrap();
        assert_eq!(phase, CoordinationPhase::NeedsFix);
        let task = stores.tasks.get("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Ready);
        let _ = agent_id;
    }

    #[tokio::test]
    async fn orphaned_in_progress_task_is_recovered_and_redelegated() {
        let stores = make_stores();
        let mut task = Task::new("t1".into(), "title", "obj", vec![]);
        task.status = TaskStatus::InProgress;
        task.assigned_agent = Some("ghost-agent".into());
        stores.tasks.save(task).await.unwrap();

        let coordinator = Coordinator::new(stores.clone(), "ws");
        let delegations = coordinator.execute_next_wave("ws").await.unwrap();

        // The orphan (no owning agent in the store) is reset to `Ready`
        // during recovery, then picked up fresh by the same wave
        // computation under a new agent, never the vanished one.
        assert_eq!(delegations.len(), 1);
        assert_ne!(delegations[0].agent_id, "ghost-agent");
        let task = stores.tasks.get("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.assigned_agent.as_deref(), Some(delegations[0].agent_id.as_str()));
    }

    #[tokio::test]
    async fn orphaned_task_with_unsatisfied_dependency_resets_but_is_not_runnable() {
        let stores = make_stores();
        stores
            .register_task(Task::new("dep".into(), "dep", "obj", vec![]))
            .await
            .unwrap();
        let mut task = Task::new("t1".into(), "title", "obj", vec!["dep".into()]);
        task.status = TaskStatus::Assigned;
        task.assigned_agent = Some("ghost-agent".into());
        stores.tasks.save(task).await.unwrap();

        let coordinator = Coordinator::new(stores.clone(), "ws");
        let delegations = coordinator.execute_next_wave("ws").await.unwrap();

        // Only `dep` is runnable this wave; the orphan is reset to `Ready`
        // but still blocked on its unfinished dependency.
        assert_eq!(delegations.len(), 1);
        assert_eq!(delegations[0].task_id, "dep");
        let task = stores.tasks.get("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Ready);
    }
}
