//! Shared types for the sync layer and the view models.
//!
//! Plain data only; nothing here touches the runtime or the network.

use serde::{Deserialize, Serialize};

use stockbook_inventory::Item;

/// Connectivity state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    /// No check has completed yet.
    Unknown,
    /// The last check reached the item table.
    Online,
    /// The last check failed.
    Offline,
}

/// Result of the latest connectivity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub is_connected: bool,
    /// At least one check has completed.
    pub connection_checked: bool,
}

impl ConnectionStatus {
    pub fn state(&self) -> ConnectivityState {
        match (self.connection_checked, self.is_connected) {
            (false, _) => ConnectivityState::Unknown,
            (true, true) => ConnectivityState::Online,
            (true, false) => ConnectivityState::Offline,
        }
    }
}

/// Where the current collection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemSource {
    /// Nothing loaded yet.
    #[default]
    Empty,
    /// Fetched from the data service.
    Remote,
    /// The built-in sample collection (service unreachable).
    Fallback,
}

/// Snapshot of the sync state a UI renders from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncState {
    pub items: Vec<Item>,
    pub loading: bool,
    /// Last user-facing error message, cleared when a new operation starts.
    pub error: Option<String>,
    pub source: ItemSource,
}

/// How a completed load filled the collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "source")]
pub enum LoadOutcome {
    Remote { count: usize },
    Fallback { error: String },
}
