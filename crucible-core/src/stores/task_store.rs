use std::collections::{HashMap, HashSet};

use crucible_types::Task;
use tokio::sync::RwLock;

use crate::error::{CoreError, CoreResult};

#[derive(Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<String, Task>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &str) -> Option<Task> {
        self.tasks.read().await.get(id).cloned()
    }

    /// Rejects the save if it would introduce a dependency cycle (§3
    /// Invariants: "the task store rejects additions that would create a
    /// cycle").
    pub async fn save(&self, task: Task) -> CoreResult<()> {
        let mut tasks = self.tasks.write().await;
        let mut probe = tasks.clone();
        probe.insert(task.id.clone(), task.clone());
        if let Some(cycle) = detect_cycle(&probe) {
            return Err(CoreError::CycleDetected(cycle));
        }
        tasks.insert(task.id.clone(), task);
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> CoreResult<()> {
        self.tasks
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CoreError::NotFound(format!("task {id}")))
    }

    pub async fn list_all(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }
}

fn detect_cycle(tasks: &HashMap<String, Task>) -> Option<Vec<String>> {
    for id in tasks.keys() {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        if dfs_cycle(id, tasks, &mut visited, &mut path) {
            return Some(path);
        }
    }
    None
}

fn dfs_cycle(
    id: &str,
    tasks: &HashMap<String, Task>,
    visited: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> bool {
    if path.iter().any(|p| p == id) {
        path.push(id.to_string());
        return true;
    }
    if visited.contains(id) {
        return false;
    }
    visited.insert(id.to_string());
    path.push(id.to_string());
    if let Some(task) = tasks.get(id) {
        for dep in &task.dependencies {
            if dfs_cycle(dep, tasks, visited, path) {
                return true;
            }
        }
    }
    path.pop();
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_types::Task;

    #[tokio::test]
    async fn rejects_cycle() {
        let store = TaskStore::new();
        store
            .save(Task::new("1".into(), "t1", "obj", vec!["2".into()]))
            .await
            .unwrap();
        let err = store
            .save(Task::new("2".into(), "t2", "obj", vec!["1".into()]))
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn accepts_dag() {
        let store = TaskStore::new();
        store
            .save(Task::new("1".into(), "t1", "obj", vec![]))
            .await
            .unwrap();
        store
            .save(Task::new("2".into(), "t2", "obj", vec!["1".into()]))
            .await
            .unwrap();
        assert_eq!(store.list_all().await.len(), 2);
    }
}
