use std::sync::Arc;

use crucible_types::{required_capabilities_for_role, AgentRole};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::provider::{Provider, ProviderError};

#[derive(Debug, Error)]
#[error("no suitable provider for role {role:?}; requirements {requirements:?}; candidate gaps {gaps:?}")]
pub struct NoSuitableProviderError {
    pub role: AgentRole,
    pub requirements: Vec<String>,
    pub gaps: Vec<(String, Vec<String>)>,
}

/// Holds an ordered registry of providers and picks one per role by
/// capability/priority match (§4.5).
#[derive(Default)]
pub struct CapabilityRouter {
    providers: RwLock<Vec<Arc<dyn Provider>>>,
}

impl CapabilityRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, provider: Arc<dyn Provider>) {
        self.providers.write().await.push(provider);
    }

    /// Candidates are providers whose capabilities satisfy the role's
    /// requirements; the one with highest `priority` wins, ties broken by
    /// registration order.
    pub async fn select_provider(
        &self,
        role: AgentRole,
    ) -> Result<Arc<dyn Provider>, NoSuitableProviderError> {
        let requirements = required_capabilities_for_role(role);
        let providers = self.providers.read().await;

        let mut best: Option<&Arc<dyn Provider>> = None;
        let mut gaps = Vec::new();
        for provider in providers.iter() {
            let caps = provider.capabilities();
            if caps.supports.satisfies(requirements) {
                let better = match best {
                    None => true,
                    Some(current) => caps.priority > current.capabilities().priority,
                };
                if better {
                    best = Some(provider);
                }
            } else {
                gaps.push((caps.name.clone(), caps.supports.gaps(requirements)));
            }
        }

        best.cloned().ok_or_else(|| NoSuitableProviderError {
            role,
            requirements: requirements.iter().map(|s| s.to_string()).collect(),
            gaps,
        })
    }

    /// Best-effort broadcast to all providers; one provider's error does
    /// not prevent the others (§4.5).
    pub async fn interrupt_all(&self, agent_id: &str) {
        for provider in self.providers.read().await.iter() {
            if let Err(err) = provider.interrupt(agent_id).await {
                tracing::warn!(agent_id, error = %err, "provider interrupt failed");
            }
        }
    }

    pub async fn cleanup_all(&self, agent_id: &str) {
        for provider in self.providers.read().await.iter() {
            if let Err(err) = provider.cleanup(agent_id).await {
                tracing::warn!(agent_id, error = %err, "provider cleanup failed");
            }
        }
    }

    pub async fn shutdown_all(&self) {
        for provider in self.providers.read().await.iter() {
            if let Err(err) = provider.shutdown().await {
                tracing::warn!(error = %err, "provider shutdown failed");
            }
        }
    }

    /// Conjunctive: an agent is healthy only if every provider that might
    /// own it reports healthy (§4.5).
    pub async fn is_healthy(&self, agent_id: &str) -> bool {
        for provider in self.providers.read().await.iter() {
            if !provider.is_healthy(agent_id).await {
                return false;
            }
        }
        true
    }
}

#[allow(dead_code)]
fn _assert_provider_error_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<ProviderError>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderCapabilities, SupportFlags};
    use async_trait::async_trait;

    struct Stub {
        name: &'static str,
        priority: i32,
        flags: SupportFlags,
    }

    #[async_trait]
    impl Provider for Stub {
        async fn run(&self, _role: AgentRole, _agent_id: &str, _prompt: &str) -> Result<String, ProviderError> {
            Ok("ok".to_string())
        }
        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                name: self.name.to_string(),
                supports: self.flags.clone(),
                max_concurrent_agents: 4,
                priority: self.priority,
            }
        }
    }

    #[tokio::test]
    async fn picks_highest_priority_capable_candidate() {
        let router = CapabilityRouter::new();
        router
            .register(Arc::new(Stub {
                name: "low",
                priority: 1,
                flags: SupportFlags {
                    terminal: true,
                    file_editing: true,
                    ..Default::default()
                },
            }))
            .await;
        router
            .register(Arc::new(Stub {
                name: "high",
                priority: 10,
                flags: SupportFlags {
                    terminal: true,
                    file_editing: true,
                    ..Default::default()
                },
            }))
            .await;
        let chosen = router.select_provider(AgentRole::Implementor).await.unwrap();
        assert_eq!(chosen.capabilities().name, "high");
    }

    #[tokio::test]
    async fn fails_with_gap_list_when_nobody_qualifies() {
        let router = CapabilityRouter::new();
        router
            .register(Arc::new(Stub {
                name: "bare",
                priority: 1,
                flags: SupportFlags::default(),
            }))
            .await;
        let err = router.select_provider(AgentRole::Implementor).await.unwrap_err();
        assert_eq!(err.gaps.len(), 1);
        assert!(err.gaps[0].1.contains(&"terminal".to_string()));
    }
}
