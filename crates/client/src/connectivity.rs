//! Connectivity monitoring.
//!
//! Probes the item table on start and then on a fixed interval. A missing
//! table is not an outage: the monitor initializes it and reports connected
//! if that worked.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::backend::RemoteDataService;
use crate::types::{ConnectionStatus, ConnectivityState};

/// Polls the data service and publishes a [`ConnectionStatus`]. Cheap to
/// clone; clones share the status.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    backend: Arc<dyn RemoteDataService>,
    interval: Duration,
    status: Arc<watch::Sender<ConnectionStatus>>,
}

impl ConnectivityMonitor {
    pub fn new(backend: Arc<dyn RemoteDataService>, interval: Duration) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        Self {
            backend,
            interval,
            status: Arc::new(status),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn state(&self) -> ConnectivityState {
        self.status().state()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Run one probe and publish the result.
    pub async fn check_now(&self) -> ConnectionStatus {
        let is_connected = match self.backend.probe_items().await {
            Ok(()) => true,
            Err(err) if err.is_missing_table() => {
                tracing::info!("item table missing, initializing");
                match self.backend.initialize_schema().await {
                    Ok(()) => true,
                    Err(init_err) => {
                        tracing::warn!(error = %init_err, "table initialization failed");
                        false
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "connectivity probe failed");
                false
            }
        };

        let next = ConnectionStatus {
            is_connected,
            connection_checked: true,
        };
        let previous = self.status.send_replace(next);
        if previous.state() != next.state() {
            tracing::info!(from = ?previous.state(), to = ?next.state(), "connectivity changed");
        }
        next
    }

    /// Check now and then every interval until the handle is stopped or
    /// dropped.
    pub fn start(&self) -> MonitorHandle {
        let shutdown = Arc::new(Notify::new());
        let monitor = self.clone();
        let stop = shutdown.clone();

        let task = tokio::spawn(async move {
            tracing::info!(interval = ?monitor.interval, "connectivity monitor started");
            let mut ticker = tokio::time::interval(monitor.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = stop.notified() => break,
                    _ = ticker.tick() => {
                        monitor.check_now().await;
                    }
                }
            }

            tracing::info!("connectivity monitor stopped");
        });

        MonitorHandle {
            shutdown,
            task: Some(task),
        }
    }
}

/// Running poll loop of a [`ConnectivityMonitor`].
pub struct MonitorHandle {
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub async fn stop(mut self) {
        self.shutdown.notify_one();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "connectivity monitor ended abnormally");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.shutdown.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, InMemoryBackend, Operation};

    fn monitor(backend: InMemoryBackend) -> (Arc<InMemoryBackend>, ConnectivityMonitor) {
        let backend = Arc::new(backend);
        let monitor = ConnectivityMonitor::new(backend.clone(), Duration::from_secs(30));
        (backend, monitor)
    }

    #[tokio::test]
    async fn starts_unknown() {
        let (_, monitor) = monitor(InMemoryBackend::new());
        assert_eq!(monitor.state(), ConnectivityState::Unknown);
    }

    #[tokio::test]
    async fn reachable_table_is_connected() {
        let (_, monitor) = monitor(InMemoryBackend::new());
        let status = monitor.check_now().await;
        assert!(status.is_connected);
        assert!(status.connection_checked);
        assert_eq!(monitor.state(), ConnectivityState::Online);
    }

    #[tokio::test]
    async fn missing_table_connected_after_initialization() {
        let (backend, monitor) = monitor(InMemoryBackend::without_schema());
        assert!(monitor.check_now().await.is_connected);
        assert_eq!(backend.calls(Operation::InitSchema), 1);
        assert!(backend.schema_ready());
    }

    #[tokio::test]
    async fn missing_table_and_failed_initialization_is_disconnected() {
        let (backend, monitor) = monitor(InMemoryBackend::without_schema());
        backend.fail_next(Operation::InitSchema, BackendError::new("function not found"));
        let status = monitor.check_now().await;
        assert!(!status.is_connected);
        assert!(status.connection_checked);
    }

    #[tokio::test]
    async fn other_failures_are_disconnected() {
        let (backend, monitor) = monitor(InMemoryBackend::new());
        backend.fail_next(Operation::Probe, BackendError::transport("timeout"));
        assert!(!monitor.check_now().await.is_connected);
        assert_eq!(monitor.state(), ConnectivityState::Offline);
        assert_eq!(backend.calls(Operation::InitSchema), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_immediately_then_every_interval() {
        let (backend, monitor) = monitor(InMemoryBackend::new());
        let handle = monitor.start();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(backend.calls(Operation::Probe), 2);

        handle.stop().await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(backend.calls(Operation::Probe), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_stops_polling() {
        let (backend, monitor) = monitor(InMemoryBackend::new());
        drop(monitor.start());
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(backend.calls(Operation::Probe) <= 1);
    }
}
