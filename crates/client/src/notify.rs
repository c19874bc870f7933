//! Transient user notifications (the toast channel).
//!
//! Every notification is logged as well as broadcast; a UI subscribes and
//! renders whatever arrives. Nobody listening is fine.

use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

/// Broadcast channel for notifications. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Notifications {
    tx: broadcast::Sender<Notification>,
}

impl Notifications {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn success(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(%message, "notify success");
        self.send(NotificationLevel::Success, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(%message, "notify warning");
        self.send(NotificationLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(%message, "notify error");
        self.send(NotificationLevel::Error, message);
    }

    fn send(&self, level: NotificationLevel, message: String) {
        // No receivers is not an error.
        let _ = self.tx.send(Notification { level, message });
    }
}

impl Default for Notifications {
    fn default() -> Self {
        Self::new()
    }
}
