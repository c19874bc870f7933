//! `stockbook-client`
//!
//! **Responsibility:** inventory client over a hosted data service.
//!
//! This crate provides:
//! - The remote data service seam (in-memory and REST implementations)
//! - Inventory sync: load with retry/backoff, offline fallback to sample data,
//!   mutations with image upload, realtime-triggered reloads
//! - Connectivity monitoring
//! - View models for the item form, item card, and connection banner
//!
//! The service stays the authority; the client keeps no durable state.

pub mod backend;
pub mod config;
pub mod connectivity;
pub mod fallback;
pub mod images;
pub mod notify;
pub mod realtime;
pub mod sync;
pub mod types;
pub mod view;

pub use backend::{BackendError, InMemoryBackend, ObjectUpload, RemoteDataService};
#[cfg(feature = "rest")]
pub use backend::RestBackend;
pub use config::{ClientConfig, ConfigError, RetryPolicy, SyncConfig};
pub use connectivity::{ConnectivityMonitor, MonitorHandle};
pub use fallback::fallback_items;
pub use images::{ImageRef, ImageUploader, LocalBlobs, UploadError};
pub use notify::{Notification, NotificationLevel, Notifications};
pub use realtime::{ChangeEvent, ChangeFeed, ChangeKind, ChangeSubscription};
pub use sync::{InventorySync, SyncError, SyncHandle};
pub use types::{ConnectionStatus, ConnectivityState, ItemSource, LoadOutcome, SyncState};
pub use view::{CardImage, ConnectionBanner, FormError, ItemCard, ItemForm};
