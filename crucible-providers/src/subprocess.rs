//! Reference sub-process provider (§4.3): spawns or reuses a child process
//! per agent id, speaks a JSON-RPC-like line protocol over stdio, forwards
//! notifications as stream chunks. A shape-template, not a literal
//! reproduction of any one agent CLI's wire format.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crucible_types::{AgentRole, ChunkSink, StreamChunk, ThinkingPhase, ToolCallStatus};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::provider::{Provider, ProviderCapabilities, ProviderError, SupportFlags};

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcLine {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<serde_json::Value>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

struct OwnedProcess {
    child: Child,
    stdin: tokio::process::ChildStdin,
    last_heartbeat: DateTime<Utc>,
    interrupted: Arc<AtomicBool>,
}

/// Owns child processes keyed by agent id; `get_or_create` returns the
/// existing process or spawns one, `terminate` is idempotent (§5).
pub struct SubprocessProvider {
    command: String,
    args: Vec<String>,
    staleness_threshold: Duration,
    processes: RwLock<HashMap<String, Arc<Mutex<OwnedProcess>>>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl SubprocessProvider {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            staleness_threshold: Duration::from_secs(300),
            processes: RwLock::new(HashMap::new()),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    pub fn with_staleness_threshold(mut self, threshold: Duration) -> Self {
        self.staleness_threshold = threshold;
        self
    }

    async fn get_or_create(&self, agent_id: &str) -> Result<Arc<Mutex<OwnedProcess>>, ProviderError> {
        if let Some(existing) = self.processes.read().await.get(agent_id) {
            return Ok(existing.clone());
        }
        let mut processes = self.processes.write().await;
        if let Some(existing) = processes.get(agent_id) {
            return Ok(existing.clone());
        }

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProviderError::Process(format!("spawn failed: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProviderError::Process("no stdin handle".to_string()))?;

        // stderr is drained to a log-only sink; one reader task per stream (§5).
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "subprocess_stderr", "{line}");
                }
            });
        }

        let owned = Arc::new(Mutex::new(OwnedProcess {
            child,
            stdin,
            last_heartbeat: Utc::now(),
            interrupted: Arc::new(AtomicBool::new(false)),
        }));
        processes.insert(agent_id.to_string(), owned.clone());
        Ok(owned)
    }

    async fn send_request(
        &self,
        owned: &Arc<Mutex<OwnedProcess>>,
        method: &str,
        params: serde_json::Value,
    ) -> Result<u64, ProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        let mut line = serde_json::to_string(&request)
            .map_err(|e| ProviderError::Provider(format!("encode failed: {e}")))?;
        line.push('\n');
        let mut proc = owned.lock().await;
        proc.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ProviderError::Process(format!("write failed: {e}")))?;
        Ok(id)
    }

    /// Runs a single request/response round trip, forwarding intermediate
    /// notifications as stream chunks via `sink`. Spawns one reader task
    /// over stdout, partitioned into line-framed JSON (§5).
    async fn run_inner(
        &self,
        agent_id: &str,
        prompt: &str,
        sink: Option<ChunkSink>,
    ) -> Result<String, ProviderError> {
        let owned = self.get_or_create(agent_id).await?;
        let stdout = {
            let mut proc = owned.lock().await;
            proc.child
                .stdout
                .take()
                .ok_or_else(|| ProviderError::Process("stdout already taken".to_string()))?
        };

        let request_id = self
            .send_request(&owned, "run", serde_json::json!({ "prompt": prompt }))
            .await?;

        if let Some(ref sink) = sink {
            sink(agent_id, StreamChunk::heartbeat());
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx.send(line);
            }
        });

        let mut final_text = String::new();
        while let Some(line) = rx.recv().await {
            let Ok(parsed) = serde_json::from_str::<JsonRpcLine>(&line) else {
                continue;
            };

            if let Some(method) = parsed.method.as_deref() {
                self.forward_notification(agent_id, method, parsed.params, sink.as_ref())
                    .await;
                continue;
            }

            if parsed.id == Some(request_id) {
                if let Some(error) = parsed.error {
                    return Err(ProviderError::Provider(error.to_string()));
                }
                if let Some(result) = parsed.result {
                    final_text = result
                        .get("text")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                }
                break;
            }
        }

        {
            let mut proc = owned.lock().await;
            proc.last_heartbeat = Utc::now();
        }

        if let Some(ref sink) = sink {
            sink(
                agent_id,
                StreamChunk::Completed {
                    stop_reason: "complete".to_string(),
                    token_count: None,
                },
            );
        }

        Ok(final_text)
    }

    async fn forward_notification(
        &self,
        agent_id: &str,
        method: &str,
        params: Option<serde_json::Value>,
        sink: Option<&ChunkSink>,
    ) {
        let Some(sink) = sink else { return };
        let params = params.unwrap_or(serde_json::Value::Null);
        match method {
            "session/text" => {
                if let Some(text) = params.get("text").and_then(|v| v.as_str()) {
                    sink(agent_id, StreamChunk::Text { content: text.to_string() });
                }
            }
            "session/thought" => {
                if let Some(text) = params.get("text").and_then(|v| v.as_str()) {
                    sink(
                        agent_id,
                        StreamChunk::Thinking {
                            phase: ThinkingPhase::Chunk,
                            content: text.to_string(),
                        },
                    );
                }
            }
            "session/tool_call" => {
                let name = params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("tool")
                    .to_string();
                let raw_status = params
                    .get("status")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                sink(
                    agent_id,
                    StreamChunk::ToolCall {
                        name,
                        status: ToolCallStatus::from_external(raw_status),
                        args: params.get("args").cloned(),
                        result: params.get("result").cloned(),
                    },
                );
            }
            _ => {
                tracing::debug!(agent_id, method, "unhandled subprocess notification");
            }
        }
    }
}

#[async_trait]
impl Provider for SubprocessProvider {
    async fn run(&self, _role: AgentRole, agent_id: &str, prompt: &str) -> Result<String, ProviderError> {
        self.run_inner(agent_id, prompt, None).await
    }

    async fn run_streaming(
        &self,
        _role: AgentRole,
        agent_id: &str,
        prompt: &str,
        sink: ChunkSink,
    ) -> Result<String, ProviderError> {
        match self.run_inner(agent_id, prompt, Some(sink.clone())).await {
            Ok(text) => Ok(text),
            Err(err) => {
                sink(
                    agent_id,
                    StreamChunk::Error {
                        message: err.message(),
                        recoverable: true,
                    },
                );
                Err(err)
            }
        }
    }

    /// Unhealthy when either the OS process is dead or the last heartbeat
    /// is older than the staleness threshold (§4.3, default 5 minutes).
    async fn is_healthy(&self, agent_id: &str) -> bool {
        let Some(owned) = self.processes.read().await.get(agent_id).cloned() else {
            return true;
        };
        let mut proc = owned.lock().await;
        let alive = matches!(proc.child.try_wait(), Ok(None));
        let fresh = Utc::now() - proc.last_heartbeat
            < chrono::Duration::from_std(self.staleness_threshold).unwrap_or_default();
        alive && fresh
    }

    async fn interrupt(&self, agent_id: &str) -> Result<(), ProviderError> {
        if let Some(owned) = self.processes.read().await.get(agent_id).cloned() {
            owned.lock().await.interrupted.store(true, Ordering::SeqCst);
            let _ = self
                .send_request(&owned, "interrupt", serde_json::json!({}))
                .await;
        }
        Ok(())
    }

    async fn cleanup(&self, agent_id: &str) -> Result<(), ProviderError> {
        if let Some(owned) = self.processes.write().await.remove(agent_id) {
            let mut proc = owned.lock().await;
            let _ = proc.child.start_kill();
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ProviderError> {
        let mut processes = self.processes.write().await;
        for (_, owned) in processes.drain() {
            let mut proc = owned.lock().await;
            let _ = proc.child.start_kill();
        }
        Ok(())
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            name: "subprocess".to_string(),
            supports: SupportFlags {
                streaming: true,
                interrupt: true,
                health_check: true,
                file_editing: true,
                terminal: true,
                tool_calling: true,
            },
            max_concurrent_agents: 8,
            priority: 5,
        }
    }
}
