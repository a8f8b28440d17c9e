use std::collections::VecDeque;
use std::sync::Arc;

use crucible_types::PipelineEvent;
use tokio::sync::{broadcast, Mutex};

pub const DEFAULT_REPLAY_SIZE: usize = 16;
const SUBSCRIBER_BUFFER: usize = 256;

/// A published topic of pipeline events (§4.7), structurally similar to
/// [`crucible_core::event_bus::EventBus`] but a distinct, separately-scoped
/// bus never mixed into the agent domain-event bus.
pub struct PipelineEventBus {
    tx: broadcast::Sender<PipelineEvent>,
    recent: Mutex<VecDeque<PipelineEvent>>,
    replay_size: usize,
}

impl PipelineEventBus {
    pub fn new() -> Self {
        Self::with_replay_size(DEFAULT_REPLAY_SIZE)
    }

    pub fn with_replay_size(replay_size: usize) -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self {
            tx,
            recent: Mutex::new(VecDeque::with_capacity(replay_size)),
            replay_size,
        }
    }

    pub async fn subscribe(&self) -> (Vec<PipelineEvent>, broadcast::Receiver<PipelineEvent>) {
        let recent = self.recent.lock().await;
        (recent.iter().cloned().collect(), self.tx.subscribe())
    }

    pub async fn emit(&self, event: PipelineEvent) {
        let mut recent = self.recent.lock().await;
        recent.push_back(event.clone());
        while recent.len() > self.replay_size {
            recent.pop_front();
        }
        drop(recent);
        let _ = self.tx.send(event);
    }

    /// Non-suspending emit: the log append is best-effort.
    pub fn try_emit(&self, event: PipelineEvent) {
        if let Ok(mut recent) = self.recent.try_lock() {
            recent.push_back(event.clone());
            while recent.len() > self.replay_size {
                recent.pop_front();
            }
        }
        let _ = self.tx.send(event);
    }

    pub async fn subscribe_for_pipeline(&self, pipeline_id: impl Into<String>) -> PipelineSubscription {
        let (_, rx) = self.subscribe().await;
        PipelineSubscription {
            rx,
            pipeline_id: pipeline_id.into(),
        }
    }

    pub async fn subscribe_filtered(
        &self,
        predicate: impl Fn(&PipelineEvent) -> bool + Send + Sync + 'static,
    ) -> TypedPipelineSubscription {
        let (_, rx) = self.subscribe().await;
        TypedPipelineSubscription {
            rx,
            predicate: Arc::new(predicate),
        }
    }
}

impl Default for PipelineEventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PipelineSubscription {
    rx: broadcast::Receiver<PipelineEvent>,
    pipeline_id: String,
}

impl PipelineSubscription {
    pub async fn next(&mut self) -> Option<PipelineEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.pipeline_id() == self.pipeline_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Typed subscription filtered by an arbitrary predicate, e.g. stage
/// completions/failures (§4.7).
pub struct TypedPipelineSubscription {
    rx: broadcast::Receiver<PipelineEvent>,
    predicate: Arc<dyn Fn(&PipelineEvent) -> bool + Send + Sync>,
}

impl TypedPipelineSubscription {
    pub async fn next(&mut self) -> Option<PipelineEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if (self.predicate)(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn started(id: &str) -> PipelineEvent {
        PipelineEvent::PipelineStarted {
            pipeline_id: id.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn replay_buffer_caps_at_configured_size() {
        let bus = PipelineEventBus::with_replay_size(2);
        bus.emit(started("p")).await;
        bus.emit(started("p")).await;
        bus.emit(started("p")).await;
        let (replay, _rx) = bus.subscribe().await;
        assert_eq!(replay.len(), 2);
    }

    #[tokio::test]
    async fn subscription_filters_by_pipeline_id() {
        let bus = PipelineEventBus::new();
        let mut sub = bus.subscribe_for_pipeline("a").await;
        bus.emit(started("b")).await;
        bus.emit(started("a")).await;
        let event = sub.next().await.unwrap();
        assert_eq!(event.pipeline_id(), "a");
    }
}
