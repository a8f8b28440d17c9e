//! Reference in-process provider (§4.3): invokes an in-memory LLM
//! abstraction directly, with no child process. Does not support mid-run
//! interrupt; `interrupt` only marks a flag that makes `is_healthy` return
//! false so the coordinator stops waiting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use crucible_types::AgentRole;
use tokio::sync::RwLock;

use crate::provider::{Provider, ProviderCapabilities, ProviderError, SupportFlags};

/// The in-memory completion abstraction this provider drives. Implemented
/// by whatever LLM client the embedding application provides; a
/// deterministic stub is supplied below for tests and CLI demos.
#[async_trait]
pub trait InMemoryLlm: Send + Sync {
    async fn complete(&self, role: AgentRole, prompt: &str) -> Result<String, ProviderError>;
}

pub struct InProcessProvider {
    llm: Arc<dyn InMemoryLlm>,
    interrupted: RwLock<HashMap<String, Arc<AtomicBool>>>,
}

impl InProcessProvider {
    pub fn new(llm: Arc<dyn InMemoryLlm>) -> Self {
        Self {
            llm,
            interrupted: RwLock::new(HashMap::new()),
        }
    }

    async fn flag_for(&self, agent_id: &str) -> Arc<AtomicBool> {
        if let Some(flag) = self.interrupted.read().await.get(agent_id) {
            return flag.clone();
        }
        let mut map = self.interrupted.write().await;
        map.entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }
}

#[async_trait]
impl Provider for InProcessProvider {
    async fn run(&self, role: AgentRole, agent_id: &str, prompt: &str) -> Result<String, ProviderError> {
        let flag = self.flag_for(agent_id).await;
        if flag.load(Ordering::SeqCst) {
            return Err(ProviderError::Process(format!("agent {agent_id} was interrupted")));
        }
        self.llm.complete(role, prompt).await
    }

    async fn is_healthy(&self, agent_id: &str) -> bool {
        !self.flag_for(agent_id).await.load(Ordering::SeqCst)
    }

    async fn interrupt(&self, agent_id: &str) -> Result<(), ProviderError> {
        self.flag_for(agent_id).await.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn cleanup(&self, agent_id: &str) -> Result<(), ProviderError> {
        self.interrupted.write().await.remove(agent_id);
        Ok(())
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            name: "in_process".to_string(),
            supports: SupportFlags {
                streaming: false,
                interrupt: false,
                health_check: true,
                file_editing: true,
                terminal: true,
                tool_calling: true,
            },
            max_concurrent_agents: 32,
            priority: 1,
        }
    }
}

/// Deterministic stub used by tests and the CLI's offline demo mode.
pub struct EchoLlm;

#[async_trait]
impl InMemoryLlm for EchoLlm {
    async fn complete(&self, role: AgentRole, prompt: &str) -> Result<String, ProviderError> {
        Ok(format!("[{role:?}] echo: {prompt}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn interrupt_marks_unhealthy_and_blocks_further_runs() {
        let provider = InProcessProvider::new(Arc::new(EchoLlm));
        assert!(provider.is_healthy("a").await);
        provider.interrupt("a").await.unwrap();
        assert!(!provider.is_healthy("a").await);
        let result = provider.run(AgentRole::Implementor, "a", "hi").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn interrupt_is_idempotent() {
        let provider = InProcessProvider::new(Arc::new(EchoLlm));
        provider.interrupt("a").await.unwrap();
        provider.interrupt("a").await.unwrap();
        assert!(!provider.is_healthy("a").await);
    }
}
