//! `stockbook`: headless inventory shell.
//!
//! Mounts the inventory sync and the connectivity monitor against the REST
//! backend and prints the listing whenever it changes, until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;

use stockbook_client::{
    ClientConfig, ConnectionBanner, ConnectivityMonitor, InventorySync, ItemCard, Notifications,
    RemoteDataService, RestBackend, SyncState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    stockbook_observability::init();

    let config = ClientConfig::from_env().context("invalid STOCKBOOK_* configuration")?;
    if config.api_key.is_empty() {
        tracing::warn!("STOCKBOOK_API_KEY is not set; requests will be anonymous");
    }
    tracing::info!(service_url = %config.service_url, table = %config.table, "starting stockbook");

    let backend: Arc<dyn RemoteDataService> = Arc::new(RestBackend::new(&config));
    let notifications = Notifications::new();
    let sync = InventorySync::new(backend.clone(), notifications.clone(), config.sync_config());
    let monitor = ConnectivityMonitor::new(backend, config.poll_interval);

    let mut state = sync.watch();
    let mut status = monitor.watch();
    let mut toasts = notifications.subscribe();
    let mut banner = ConnectionBanner::new();

    let monitor_handle = monitor.start();
    let sync_handle = sync.mount();

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for Ctrl-C")?;
                tracing::info!("shutting down");
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = state.borrow_and_update().clone();
                print_listing(&snapshot);
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                if banner.observe(current, &notifications) {
                    if let Some(message) = banner.message() {
                        println!("!! {message}");
                    }
                }
            }
            toast = toasts.recv() => {
                if let Ok(toast) = toast {
                    println!("[{:?}] {}", toast.level, toast.message);
                }
            }
        }
    }

    sync_handle.unmount().await;
    monitor_handle.stop().await;
    Ok(())
}

fn print_listing(state: &SyncState) {
    if state.loading {
        return;
    }
    println!("-- {} item(s) ({:?})", state.items.len(), state.source);
    for card in state.items.iter().map(ItemCard::new) {
        println!(
            "{:<40} buy {:>10}  sell {:>10}  qty {:>4} ({:?})  {} / {}  {}",
            card.title,
            card.purchase_price,
            card.selling_price,
            card.quantity,
            card.stock_level,
            card.category,
            card.supplier,
            card.date_label
        );
    }
}
