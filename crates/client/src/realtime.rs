//! Realtime change feed.
//!
//! Change events are a nudge, not data: consumers reload the collection on
//! any event for their table. Delivery is best-effort fan-out to every live
//! subscription; a subscriber that falls behind skips ahead.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use stockbook_inventory::ItemId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row-level change in a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub id: Option<ItemId>,
}

impl ChangeEvent {
    pub fn new(table: impl Into<String>, kind: ChangeKind, id: Option<ItemId>) -> Self {
        Self {
            table: table.into(),
            kind,
            id,
        }
    }
}

/// Publisher side of the feed. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to every live subscription. Returns how many received it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to all event types for `table`.
    pub fn subscribe(&self, table: impl Into<String>) -> ChangeSubscription {
        ChangeSubscription {
            table: table.into(),
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

/// A subscription filtered to one table. Dropping it unsubscribes.
#[derive(Debug)]
pub struct ChangeSubscription {
    table: String,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl ChangeSubscription {
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Next event for this table, or `None` once the feed is closed.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.table == self.table => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(table = %self.table, skipped, "change subscription lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
