//! Connection-lost banner.

use crate::notify::Notifications;
use crate::types::{ConnectionStatus, ConnectivityState};

pub const BANNER_MESSAGE: &str = "Connection to database lost";
pub const LOST_NOTICE: &str = "Database connection lost! Please check your internet connection.";

/// Shown only after a completed check reported the service unreachable, so a
/// pending first check never flashes the banner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionBanner {
    state: Option<ConnectivityState>,
}

impl ConnectionBanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new status. Announces the loss once per transition into
    /// offline. Returns whether the banner is visible afterwards.
    pub fn observe(&mut self, status: ConnectionStatus, notifications: &Notifications) -> bool {
        let next = status.state();
        let was_offline = self.state == Some(ConnectivityState::Offline);
        if next == ConnectivityState::Offline && !was_offline {
            notifications.error(LOST_NOTICE);
        }
        self.state = Some(next);
        self.is_visible()
    }

    pub fn is_visible(&self) -> bool {
        self.state == Some(ConnectivityState::Offline)
    }

    pub fn message(&self) -> Option<&'static str> {
        self.is_visible().then_some(BANNER_MESSAGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationLevel;

    const OFFLINE: ConnectionStatus = ConnectionStatus {
        is_connected: false,
        connection_checked: true,
    };
    const ONLINE: ConnectionStatus = ConnectionStatus {
        is_connected: true,
        connection_checked: true,
    };

    #[test]
    fn hidden_until_a_check_fails() {
        let notifications = Notifications::new();
        let mut banner = ConnectionBanner::new();
        assert!(!banner.observe(ConnectionStatus::default(), &notifications));
        assert!(!banner.observe(ONLINE, &notifications));
        assert!(banner.observe(OFFLINE, &notifications));
        assert_eq!(banner.message(), Some(BANNER_MESSAGE));
        assert!(!banner.observe(ONLINE, &notifications));
        assert_eq!(banner.message(), None);
    }

    #[tokio::test]
    async fn announces_once_per_outage() {
        let notifications = Notifications::new();
        let mut rx = notifications.subscribe();
        let mut banner = ConnectionBanner::new();

        banner.observe(OFFLINE, &notifications);
        banner.observe(OFFLINE, &notifications);
        banner.observe(ONLINE, &notifications);
        banner.observe(OFFLINE, &notifications);

        for _ in 0..2 {
            let note = rx.recv().await.unwrap();
            assert_eq!(note.level, NotificationLevel::Error);
            assert_eq!(note.message, LOST_NOTICE);
        }
        assert!(rx.try_recv().is_err());
    }
}
