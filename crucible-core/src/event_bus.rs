use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use crucible_types::DomainEvent;
use tokio::sync::{broadcast, Mutex};

pub const DEFAULT_REPLAY_SIZE: usize = 32;
pub const DEFAULT_MAX_LOG_SIZE: usize = 500;
const SUBSCRIBER_BUFFER: usize = 256;

struct EventBusInner {
    /// Most recent events regardless of category, for late subscribers
    /// (§4.2: "receive the most recent replaySize events").
    recent: VecDeque<DomainEvent>,
    /// Critical events only, capped at `max_log_size`, oldest-first eviction.
    critical_log: VecDeque<DomainEvent>,
}

/// Publish/subscribe of domain events with bounded history and timestamped
/// replay (§4.2). Process-wide with a single init-per-workspace lifecycle;
/// tests reset it via [`EventBus::clear`].
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
    inner: Arc<Mutex<EventBusInner>>,
    replay_size: usize,
    max_log_size: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_REPLAY_SIZE, DEFAULT_MAX_LOG_SIZE)
    }

    pub fn with_limits(replay_size: usize, max_log_size: usize) -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self {
            tx,
            inner: Arc::new(Mutex::new(EventBusInner {
                recent: VecDeque::with_capacity(replay_size),
                critical_log: VecDeque::with_capacity(max_log_size),
            })),
            replay_size,
            max_log_size,
        }
    }

    /// Subscribe, receiving the replay buffer alongside a live receiver so a
    /// late subscriber never misses the most recent events.
    pub async fn subscribe(&self) -> (Vec<DomainEvent>, broadcast::Receiver<DomainEvent>) {
        let inner = self.inner.lock().await;
        (inner.recent.iter().cloned().collect(), self.tx.subscribe())
    }

    /// Suspending emit: always appends to the log under the mutex, then
    /// broadcasts. The broadcast itself never blocks the caller; slow
    /// subscribers drop lagged messages per `tokio::sync::broadcast`
    /// semantics, which realises "may drop for subscribers whose buffers
    /// are full" (§4.2).
    pub async fn emit(&self, event: DomainEvent) {
        let mut inner = self.inner.lock().await;
        Self::record(&mut inner, &event, self.replay_size, self.max_log_size);
        drop(inner);
        let _ = self.tx.send(event);
    }

    /// Non-suspending emit: if the lock can't be taken synchronously, the
    /// log append is dropped but the subscriber broadcast still happens
    /// (§4.2: "may drop the in-memory log append if a lock cannot be taken
    /// synchronously").
    pub fn try_emit(&self, event: DomainEvent) {
        if let Ok(mut inner) = self.inner.try_lock() {
            Self::record(&mut inner, &event, self.replay_size, self.max_log_size);
        }
        let _ = self.tx.send(event);
    }

    fn record(
        inner: &mut EventBusInner,
        event: &DomainEvent,
        replay_size: usize,
        max_log_size: usize,
    ) {
        inner.recent.push_back(event.clone());
        while inner.recent.len() > replay_size {
            inner.recent.pop_front();
        }
        if event.is_critical() {
            inner.critical_log.push_back(event.clone());
            while inner.critical_log.len() > max_log_size {
                inner.critical_log.pop_front();
            }
        }
    }

    /// All critical events with timestamp strictly greater than `t`, in
    /// chronological order (§4.2).
    pub async fn replay_since(&self, t: DateTime<Utc>) -> Vec<DomainEvent> {
        let inner = self.inner.lock().await;
        inner
            .critical_log
            .iter()
            .filter(|e| e.timestamp() > t)
            .cloned()
            .collect()
    }

    /// Typed subscription: a lazy, restartable stream filtered to events for
    /// which `predicate` returns true (§4.2).
    pub async fn subscribe_filtered(
        &self,
        predicate: impl Fn(&DomainEvent) -> bool + Send + Sync + 'static,
    ) -> TypedSubscription {
        let (_, rx) = self.subscribe().await;
        TypedSubscription {
            rx,
            predicate: Arc::new(predicate),
        }
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.recent.clear();
        inner.critical_log.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TypedSubscription {
    rx: broadcast::Receiver<DomainEvent>,
    predicate: Arc<dyn Fn(&DomainEvent) -> bool + Send + Sync>,
}

impl TypedSubscription {
    pub async fn next(&mut self) -> Option<DomainEvent> {
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
    use crucible_types::DomainEvent;

    fn agent_created(id: &str) -> DomainEvent {
        DomainEvent::AgentCreated {
            agent_id: id.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn replay_since_is_a_prefix_as_time_advances() {
        let bus = EventBus::new();
        let t0 = Utc::now();
        bus.emit(agent_created("a")).await;
        bus.emit(agent_created("b")).await;
        let mid = Utc::now();
        bus.emit(agent_created("c")).await;

        let since_t0 = bus.replay_since(t0).await;
        let since_mid = bus.replay_since(mid).await;
        assert_eq!(since_t0.len(), 3);
        assert_eq!(since_mid.len(), 1);
    }

    #[tokio::test]
    async fn message_received_is_never_logged_as_critical() {
        let bus = EventBus::new();
        let t0 = Utc::now() - chrono::Duration::seconds(1);
        bus.emit(DomainEvent::MessageReceived {
            agent_id: "a".into(),
            message: "hi".into(),
            timestamp: Utc::now(),
        })
        .await;
        assert!(bus.replay_since(t0).await.is_empty());
    }

    #[tokio::test]
    async fn critical_log_evicts_oldest_on_overflow() {
        let bus = EventBus::with_limits(32, 2);
        let t0 = Utc::now() - chrono::Duration::seconds(1);
        bus.emit(agent_created("a")).await;
        bus.emit(agent_created("b")).await;
        bus.emit(agent_created("c")).await;
        let log = bus.replay_since(t0).await;
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn late_subscriber_receives_replay_buffer() {
        let bus = EventBus::new();
        bus.emit(agent_created("a")).await;
        bus.emit(agent_created("b")).await;
        let (replay, _rx) = bus.subscribe().await;
        assert_eq!(replay.len(), 2);
    }
}
