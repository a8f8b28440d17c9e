use async_trait::async_trait;
use crucible_types::{AgentRole, ChunkSink, StreamChunk};
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("provider error: {0}")]
    Provider(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("session error: {0}")]
    Session(String),
    #[error("process error: {0}")]
    Process(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ProviderError {
    pub fn message(&self) -> String {
        self.to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SupportFlags {
    pub streaming: bool,
    pub interrupt: bool,
    pub health_check: bool,
    pub file_editing: bool,
    pub terminal: bool,
    pub tool_calling: bool,
}

impl SupportFlags {
    /// Whether this set of flags satisfies every requirement named in
    /// `requirements` (§4.3/§4.5 capability matching). Requirement strings
    /// match [`crucible_types::required_capabilities_for_role`].
    pub fn satisfies(&self, requirements: &[&str]) -> bool {
        requirements.iter().all(|req| match *req {
            "streaming" => self.streaming,
            "interrupt" => self.interrupt,
            "health_check" => self.health_check,
            "file_editing" => self.file_editing,
            "terminal" => self.terminal,
            "tool_calling" => self.tool_calling,
            _ => false,
        })
    }

    /// Requirements from `requirements` that this set does not satisfy, for
    /// the `NoSuitableProvider` gap list (§4.5).
    pub fn gaps(&self, requirements: &[&str]) -> Vec<String> {
        requirements
            .iter()
            .filter(|req| !self.satisfies(std::slice::from_ref(*req)))
            .map(|s| s.to_string())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ProviderCapabilities {
    pub name: String,
    pub supports: SupportFlags,
    pub max_concurrent_agents: u32,
    pub priority: i32,
}

/// Uniform interface every agent provider implements (§4.3).
#[async_trait]
pub trait Provider: Send + Sync {
    async fn run(&self, role: AgentRole, agent_id: &str, prompt: &str) -> Result<String, ProviderError>;

    /// Invokes `sink` for each produced chunk in emission order; must emit
    /// at least one `Heartbeat` on connect and one `Completed` on success;
    /// on failure emits an `Error` chunk before propagating. Default
    /// fallback: invoke `run` and deliver the result as a single `Text`
    /// chunk followed by `Completed`.
    async fn run_streaming(
        &self,
        role: AgentRole,
        agent_id: &str,
        prompt: &str,
        sink: ChunkSink,
    ) -> Result<String, ProviderError> {
        sink(agent_id, StreamChunk::heartbeat());
        match self.run(role, agent_id, prompt).await {
            Ok(text) => {
                sink(
                    agent_id,
                    StreamChunk::Text {
                        content: text.clone(),
                    },
                );
                sink(
                    agent_id,
                    StreamChunk::Completed {
                        stop_reason: "complete".to_string(),
                        token_count: None,
                    },
                );
                Ok(text)
            }
            Err(err) => {
                sink(
                    agent_id,
                    StreamChunk::Error {
                        message: err.message(),
                        recoverable: !matches!(err, ProviderError::Configuration(_)),
                    },
                );
                Err(err)
            }
        }
    }

    async fn is_healthy(&self, _agent_id: &str) -> bool {
        true
    }

    /// Idempotent; after return the targeted run must transition to
    /// `Cancelled` or `Error` promptly.
    async fn interrupt(&self, _agent_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn cleanup(&self, _agent_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn capabilities(&self) -> ProviderCapabilities;
}
