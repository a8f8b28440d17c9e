mod agent_store;
mod conversation_store;
mod task_store;
mod workspace_store;

pub use agent_store::AgentStore;
pub use conversation_store::ConversationStore;
pub use task_store::TaskStore;
pub use workspace_store::{Workspace, WorkspaceStore};

use crucible_types::{
    Agent, AgentStatus, CompletionReport, DomainEvent, Task, TaskStatus, TaskVerdict,
};

use crate::error::{CoreError, CoreResult};
use crate::event_bus::EventBus;

/// The four stores from §4.1, composed behind the invariant-checked,
/// event-emitting operations callers are meant to use. Updates that change
/// observable state validate invariants, then commit, then emit the
/// corresponding critical event, in that order.
pub struct Stores {
    pub agents: AgentStore,
    pub tasks: TaskStore,
    pub conversations: ConversationStore,
    pub workspaces: WorkspaceStore,
    bus: EventBus,
}

impl Stores {
    pub fn new(bus: EventBus) -> Self {
        Self {
            agents: AgentStore::new(),
            tasks: TaskStore::new(),
            conversations: ConversationStore::new(),
            workspaces: WorkspaceStore::new(),
            bus,
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub async fn create_agent(&self, agent: Agent) {
        self.conversations.ensure(&agent.id, &agent.workspace_id).await;
        let agent_id = agent.id.clone();
        self.agents.save(agent).await;
        self.bus
            .emit(DomainEvent::AgentCreated {
                agent_id,
                timestamp: chrono::Utc::now(),
            })
            .await;
    }

    /// §3 Invariant: agent status `Completed` implies the agent emitted an
    /// `AgentCompleted` event carrying a report for exactly one task — that
    /// emission happens here, as the only path that transitions an agent to
    /// `Completed`.
    pub async fn complete_agent(&self, agent_id: &str, report: CompletionReport) -> CoreResult<()> {
        let mut agent = self
            .agents
            .get(agent_id)
            .await
            .ok_or_else(|| CoreError::NotFound(format!("agent {agent_id}")))?;
        let old_status = format!("{:?}", agent.status);
        agent.status = AgentStatus::Completed;
        agent.updated_at = chrono::Utc::now();
        self.agents.save(agent).await;
        self.bus
            .emit(DomainEvent::AgentStatusChanged {
                agent_id: agent_id.to_string(),
                old_status,
                new_status: "Completed".to_string(),
                timestamp: chrono::Utc::now(),
            })
            .await;
        self.bus
            .emit(DomainEvent::AgentCompleted {
                report,
                timestamp: chrono::Utc::now(),
            })
            .await;
        Ok(())
    }

    pub async fn change_agent_status(&self, agent_id: &str, new_status: AgentStatus) -> CoreResult<()> {
        let mut agent = self
            .agents
            .get(agent_id)
            .await
            .ok_or_else(|| CoreError::NotFound(format!("agent {agent_id}")))?;
        let old_status = format!("{:?}", agent.status);
        agent.status = new_status;
        agent.updated_at = chrono::Utc::now();
        self.agents.save(agent).await;
        self.bus
            .emit(DomainEvent::AgentStatusChanged {
                agent_id: agent_id.to_string(),
                old_status,
                new_status: format!("{new_status:?}"),
                timestamp: chrono::Utc::now(),
            })
            .await;
        Ok(())
    }

    /// Deletion of an agent with in-flight tasks fails with `Conflict`
    /// (§4.1).
    pub async fn delete_agent(&self, agent_id: &str) -> CoreResult<()> {
        let tasks = self.tasks.list_all().await;
        let in_flight = tasks.iter().any(|t| {
            t.assigned_agent.as_deref() == Some(agent_id)
                && matches!(t.status, TaskStatus::Assigned | TaskStatus::InProgress)
        });
        if in_flight {
            return Err(CoreError::Conflict(format!(
                "agent {agent_id} has in-flight tasks"
            )));
        }
        self.agents.delete(agent_id).await
    }

    pub async fn register_task(&self, task: Task) -> CoreResult<()> {
        self.tasks.save(task).await
    }

    /// §3 Invariant: a task's status ∈ {Assigned, InProgress} ⇒ its
    /// `assignedAgent` is non-null and that agent exists in the store.
    pub async fn assign_task(&self, task_id: &str, agent_id: &str) -> CoreResult<()> {
        if self.agents.get(agent_id).await.is_none() {
            return Err(CoreError::NotFound(format!("agent {agent_id}")));
        }
        let mut task = self
            .tasks
            .get(task_id)
            .await
            .ok_or_else(|| CoreError::NotFound(format!("task {task_id}")))?;
        task.assigned_agent = Some(agent_id.to_string());
        task.status = TaskStatus::Assigned;
        task.updated_at = chrono::Utc::now();
        self.tasks.save(task).await?;
        self.bus
            .emit(DomainEvent::TaskDelegated {
                agent_id: agent_id.to_string(),
                task_id: task_id.to_string(),
                timestamp: chrono::Utc::now(),
            })
            .await;
        Ok(())
    }

    pub async fn change_task_status(&self, task_id: &str, new_status: TaskStatus) -> CoreResult<()> {
        if matches!(new_status, TaskStatus::Assigned | TaskStatus::InProgress) {
            let task = self
                .tasks
                .get(task_id)
                .await
                .ok_or_else(|| CoreError::NotFound(format!("task {task_id}")))?;
            if task.assigned_agent.is_none() {
                return Err(CoreError::Conflict(format!(
                    "task {task_id} cannot enter {new_status:?} without an assigned agent"
                )));
            }
        }
        let mut task = self
            .tasks
            .get(task_id)
            .await
            .ok_or_else(|| CoreError::NotFound(format!("task {task_id}")))?;
        task.status = new_status;
        task.updated_at = chrono::Utc::now();
        self.tasks.save(task).await?;
        self.bus
            .emit(DomainEvent::TaskStatusChanged {
                task_id: task_id.to_string(),
                new_status,
                timestamp: chrono::Utc::now(),
            })
            .await;
        Ok(())
    }

    /// §3 Invariant: a task's verdict is `Approved` ⇒ task status is
    /// `Completed`.
    pub async fn set_task_verdict(&self, task_id: &str, verdict: TaskVerdict) -> CoreResult<()> {
        let mut task = self
            .tasks
            .get(task_id)
            .await
            .ok_or_else(|| CoreError::NotFound(format!("task {task_id}")))?;
        if verdict == TaskVerdict::Approved && task.status != TaskStatus::Completed {
            return Err(CoreError::Conflict(format!(
                "task {task_id} cannot be Approved unless Completed"
            )));
        }
        task.verdict = verdict;
        task.updated_at = chrono::Utc::now();
        self.tasks.save(task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_types::{Agent, AgentRole, Task};

    fn make_agent(id: &str) -> Agent {
        Agent::new(id.to_string(), "impl", AgentRole::Implementor, "ws", None)
    }

    #[tokio::test]
    async fn delete_agent_with_in_flight_task_conflicts() {
        let stores = Stores::new(EventBus::new());
        stores.create_agent(make_agent("a1")).await;
        stores
            .register_task(Task::new("t1".into(), "title", "obj", vec![]))
            .await
            .unwrap();
        stores.assign_task("t1", "a1").await.unwrap();

        let err = stores.delete_agent("a1").await;
        assert!(matches!(err, Err(CoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn verdict_approved_requires_completed_status() {
        let stores = Stores::new(EventBus::new());
        stores
            .register_task(Task::new("t1".into(), "title", "obj", vec![]))
            .await
            .unwrap();
        let err = stores.set_task_verdict("t1", TaskVerdict::Approved).await;
        assert!(err.is_err());

        stores
            .change_task_status("t1", TaskStatus::Completed)
            .await
            .unwrap();
        stores
            .set_task_verdict("t1", TaskVerdict::Approved)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn assign_task_emits_delegation_event() {
        let bus = EventBus::new();
        let stores = Stores::new(bus.clone());
        stores.create_agent(make_agent("a1")).await;
        stores
            .register_task(Task::new("t1".into(), "title", "obj", vec![]))
            .await
            .unwrap();
        let (_, mut rx) = bus.subscribe().await;
        stores.assign_task("t1", "a1").await.unwrap();
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, DomainEvent::TaskDelegated { .. }));
    }
}
