//! EventBus trait definition
//!
//! Components publish status changes here instead of calling each other,
//! so mutations never wait on whoever is listening.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use super::{ConductorEvent, EventKind};

/// Sequence number for events (monotonically increasing)
pub type EventSeq = u64;

/// Event bus for publishing and subscribing to ConductorEvents
///
/// Implementations must support:
/// - Publishing events with sequence numbers, without waiting on subscribers
/// - Live subscriptions via broadcast channel
/// - Historical replay for late joiners
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event, returns its sequence number
    async fn publish(&self, event: ConductorEvent) -> EventSeq;

    /// Subscribe to all events from now (live stream)
    fn subscribe(&self) -> broadcast::Receiver<(EventSeq, ConductorEvent)>;

    /// Get retained events starting from a sequence number (for replay)
    async fn events_from(&self, seq: EventSeq) -> Vec<(EventSeq, ConductorEvent)>;

    /// Current sequence number (high water mark)
    fn current_seq(&self) -> EventSeq;

    /// Subscribe to a single entity kind
    fn subscribe_kind(&self, kind: EventKind) -> TopicReceiver {
        TopicReceiver::new(self.subscribe(), kind)
    }
}

/// Live subscription filtered to one [`EventKind`]
pub struct TopicReceiver {
    rx: broadcast::Receiver<(EventSeq, ConductorEvent)>,
    kind: EventKind,
}

impl TopicReceiver {
    pub fn new(rx: broadcast::Receiver<(EventSeq, ConductorEvent)>, kind: EventKind) -> Self {
        Self { rx, kind }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Receive the next event of this topic
    ///
    /// Lagging is logged and skipped; `None` means the bus is gone.
    pub async fn recv(&mut self) -> Option<(EventSeq, ConductorEvent)> {
        loop {
            match self.rx.recv().await {
                Ok((seq, event)) if event.kind() == self.kind => return Some((seq, event)),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(kind = ?self.kind, skipped, "Topic subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
