//! In-memory EventBus implementation
//!
//! MemoryEventBus keeps a bounded window of recent events for replay and
//! uses a broadcast channel for live subscribers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};

use super::ConductorEvent;
use super::bus::{EventBus, EventSeq};

/// Default number of events retained for replay
pub const DEFAULT_HISTORY: usize = 1024;

/// In-memory implementation of EventBus
///
/// Publishing never waits on subscribers: a slow receiver lags and loses
/// events instead of stalling the component that published them.
pub struct MemoryEventBus {
    /// Retained events with sequence numbers, oldest first
    events: RwLock<VecDeque<(EventSeq, ConductorEvent)>>,
    /// Maximum number of retained events
    history: usize,
    /// Next sequence number to assign
    next_seq: AtomicU64,
    /// Broadcast channel for live subscribers
    tx: broadcast::Sender<(EventSeq, ConductorEvent)>,
}

impl MemoryEventBus {
    /// Create a new MemoryEventBus with the given broadcast channel capacity
    pub fn new(capacity: usize) -> Self {
        Self::with_history(capacity, DEFAULT_HISTORY)
    }

    /// Create a bus that retains at most `history` events for replay
    pub fn with_history(capacity: usize, history: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            events: RwLock::new(VecDeque::new()),
            history,
            next_seq: AtomicU64::new(0),
            tx,
        }
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: ConductorEvent) -> EventSeq {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);

        {
            let mut events = self.events.write().await;
            events.push_back((seq, event.clone()));
            while events.len() > self.history {
                events.pop_front();
            }
        }

        // Broadcast to live subscribers (ignore if no receivers)
        let _ = self.tx.send((seq, event));

        seq
    }

    fn subscribe(&self) -> broadcast::Receiver<(EventSeq, ConductorEvent)> {
        self.tx.subscribe()
    }

    async fn events_from(&self, seq: EventSeq) -> Vec<(EventSeq, ConductorEvent)> {
        self.events
            .read()
            .await
            .iter()
            .filter(|(s, _)| *s >= seq)
            .cloned()
            .collect()
    }

    fn current_seq(&self) -> EventSeq {
        self.next_seq.load(Ordering::SeqCst)
    }
}
