//! Inventory sync: the canonical in-memory item collection.
//!
//! [`InventorySync`] loads the collection from the data service, retries
//! failed loads with exponential backoff, and shows the sample collection once
//! retries run out. Mutations go straight to the service and are followed by
//! a full reload. While mounted, any change event for the item table triggers
//! a reload as well.
//!
//! Loads are serialized: one fetch is in flight at a time, and a load
//! requested while another is running is answered by the next fetch that
//! starts after the request, so bursts of change events collapse into a
//! single reload.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use stockbook_core::DomainError;
use stockbook_inventory::{sort_newest_first, Item, ItemId, ItemPatch, NewItem};

use crate::backend::{BackendError, RemoteDataService};
use crate::config::SyncConfig;
use crate::fallback::fallback_items;
use crate::images::{ImageRef, ImageUploader, LocalBlobs, UploadError};
use crate::notify::Notifications;
use crate::types::{ItemSource, LoadOutcome, SyncState};

/// Shown instead of the service message when a write is rejected by an
/// access policy.
pub const PERMISSION_MESSAGE: &str =
    "Permission denied. Please check your database access settings.";

pub const UPLOAD_MESSAGE: &str = "Failed to upload image. Please try again.";

pub const FALLBACK_NOTICE: &str = "Could not reach the database. Showing sample data.";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("{0}")]
    Backend(String),
    #[error("failed to initialize the item table: {0}")]
    Initialization(String),
    #[error("Failed to upload image. Please try again.")]
    Upload { detail: String },
    #[error("{0}")]
    Validation(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Map a service error, hiding policy details behind a generic message.
    pub fn backend(err: &BackendError) -> Self {
        if err.is_policy_violation() {
            SyncError::Backend(PERMISSION_MESSAGE.to_string())
        } else {
            SyncError::Backend(err.message.clone())
        }
    }
}

impl From<DomainError> for SyncError {
    fn from(err: DomainError) -> Self {
        SyncError::Validation(err.to_string())
    }
}

impl From<UploadError> for SyncError {
    fn from(err: UploadError) -> Self {
        SyncError::Upload {
            detail: err.to_string(),
        }
    }
}

struct Inner {
    backend: Arc<dyn RemoteDataService>,
    images: ImageUploader,
    notifications: Notifications,
    config: SyncConfig,
    state: watch::Sender<SyncState>,
    load_gate: tokio::sync::Mutex<()>,
    /// Load tickets handed out.
    requested: AtomicU64,
    /// Highest ticket answered by a finished fetch.
    completed: AtomicU64,
    last_outcome: Mutex<Option<Result<LoadOutcome, SyncError>>>,
}

/// Owner of the item collection. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct InventorySync {
    inner: Arc<Inner>,
}

impl InventorySync {
    pub fn new(
        backend: Arc<dyn RemoteDataService>,
        notifications: Notifications,
        config: SyncConfig,
    ) -> Self {
        let images = ImageUploader::new(
            backend.clone(),
            LocalBlobs::new(),
            config.cache_control.clone(),
        );
        let (state, _) = watch::channel(SyncState::default());
        Self {
            inner: Arc::new(Inner {
                backend,
                images,
                notifications,
                config,
                state,
                load_gate: tokio::sync::Mutex::new(()),
                requested: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                last_outcome: Mutex::new(None),
            }),
        }
    }

    /// Registry for picked images; its `blob:` handles are accepted as
    /// `image_url` by [`add`](Self::add) and [`update`](Self::update).
    pub fn blobs(&self) -> &LocalBlobs {
        self.inner.images.blobs()
    }

    pub fn notifications(&self) -> &Notifications {
        &self.inner.notifications
    }

    pub fn snapshot(&self) -> SyncState {
        self.inner.state.borrow().clone()
    }

    pub fn items(&self) -> Vec<Item> {
        self.inner.state.borrow().items.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.borrow().error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().loading
    }

    pub fn source(&self) -> ItemSource {
        self.inner.state.borrow().source
    }

    /// State updates for a UI to render from.
    pub fn watch(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    /// Load the whole collection, replacing the current one.
    ///
    /// Never fails because the service is down: after the last retry the
    /// sample collection is shown and `LoadOutcome::Fallback` is returned.
    pub async fn load(&self) -> Result<LoadOutcome, SyncError> {
        self.load_until(None).await
    }

    /// [`load`](Self::load) that gives up with `SyncError::Cancelled` once
    /// `stop` is requested, leaving the collection untouched.
    async fn load_until(&self, stop: Option<&StopSignal>) -> Result<LoadOutcome, SyncError> {
        let ticket = self.inner.requested.fetch_add(1, Ordering::SeqCst) + 1;
        let _gate = self.inner.load_gate.lock().await;

        if self.inner.completed.load(Ordering::SeqCst) >= ticket {
            tracing::debug!(ticket, "load answered by a concurrent fetch");
            return self.last_outcome();
        }

        let covers = self.inner.requested.load(Ordering::SeqCst);
        let outcome = self.fetch_with_retry(stop).await;
        // A cancelled fetch answers nobody; waiters fetch for themselves.
        if !matches!(outcome, Err(SyncError::Cancelled)) {
            self.inner.completed.store(covers, Ordering::SeqCst);
            if let Ok(mut last) = self.inner.last_outcome.lock() {
                *last = Some(outcome.clone());
            }
        }
        outcome
    }

    /// Same as [`load`](Self::load).
    pub async fn refresh(&self) -> Result<LoadOutcome, SyncError> {
        self.load().await
    }

    pub async fn add(&self, item: NewItem) -> Result<Item, SyncError> {
        self.clear_error();
        match self.try_add(item).await {
            Ok(stored) => {
                tracing::info!(id = %stored.id, title = %stored.title, "item added");
                self.inner.notifications.success("Book added successfully");
                self.reload_after_write().await;
                Ok(stored)
            }
            Err(err) => Err(self.report(err)),
        }
    }

    /// Write the present fields of `patch`. An empty patch is a no-op.
    pub async fn update(&self, id: ItemId, patch: ItemPatch) -> Result<(), SyncError> {
        self.clear_error();
        if patch.is_empty() {
            tracing::debug!(%id, "empty patch, nothing to update");
            return Ok(());
        }
        match self.try_update(&id, patch).await {
            Ok(()) => {
                tracing::info!(%id, "item updated");
                self.inner.notifications.success("Book updated successfully");
                self.reload_after_write().await;
                Ok(())
            }
            Err(err) => Err(self.report(err)),
        }
    }

    pub async fn delete(&self, id: ItemId) -> Result<(), SyncError> {
        self.clear_error();
        match self.inner.backend.delete_item(&id).await {
            Ok(()) => {
                tracing::info!(%id, "item deleted");
                self.inner.notifications.success("Book deleted successfully");
                self.reload_after_write().await;
                Ok(())
            }
            Err(err) => Err(self.report(SyncError::backend(&err))),
        }
    }

    /// Load now and reload on every change event for the item table until
    /// the returned handle is unmounted or dropped.
    ///
    /// Each mount owns its subscription and stop signal, so handles can be
    /// dropped and re-created independently.
    pub fn mount(&self) -> SyncHandle {
        let mut changes = self
            .inner
            .backend
            .subscribe_changes(&self.inner.config.table);
        let (stop_tx, stop_rx) = watch::channel(false);
        let stop = StopSignal(stop_rx);
        let sync = self.clone();

        let task = tokio::spawn(async move {
            tracing::info!(table = %changes.table(), "inventory sync mounted");
            if let Err(e) = sync.load_until(Some(&stop)).await {
                tracing::debug!(error = %e, "initial load did not complete");
            }

            loop {
                tokio::select! {
                    _ = stop.requested() => break,
                    event = changes.recv() => match event {
                        Some(event) => {
                            tracing::debug!(kind = ?event.kind, id = ?event.id, "change received, reloading");
                            if let Err(e) = sync.load_until(Some(&stop)).await {
                                tracing::debug!(error = %e, "reload did not complete");
                            }
                        }
                        None => {
                            tracing::warn!("change feed closed");
                            break;
                        }
                    }
                }
            }

            tracing::info!("inventory sync unmounted");
        });

        SyncHandle {
            sync: self.clone(),
            stop: stop_tx,
            task: Some(task),
        }
    }

    async fn fetch_with_retry(
        &self,
        stop: Option<&StopSignal>,
    ) -> Result<LoadOutcome, SyncError> {
        self.inner.state.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });

        let retry = self.inner.config.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0;
        let result = loop {
            match self.fetch().await {
                Ok(items) => break Ok(items),
                Err(err) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        break Err(err);
                    }
                    let delay = retry.delay_for(attempt - 1);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error = %err,
                        "loading items failed, retrying in {:?}",
                        delay
                    );
                    if !backoff(delay, stop).await {
                        return self.cancelled();
                    }
                }
            }
        };

        if stop.is_some_and(StopSignal::is_requested) {
            return self.cancelled();
        }

        match result {
            Ok(mut items) => {
                sort_newest_first(&mut items);
                let count = items.len();
                self.inner.state.send_modify(|s| {
                    s.items = items;
                    s.loading = false;
                    s.error = None;
                    s.source = ItemSource::Remote;
                });
                tracing::info!(count, "items loaded");
                Ok(LoadOutcome::Remote { count })
            }
            Err(err) => {
                let error = err.to_string();
                tracing::warn!(attempts = max_attempts, %error, "loading items failed, showing sample data");
                self.inner.state.send_modify(|s| {
                    s.items = fallback_items();
                    s.loading = false;
                    s.error = Some(error.clone());
                    s.source = ItemSource::Fallback;
                });
                self.inner.notifications.warning(FALLBACK_NOTICE);
                Ok(LoadOutcome::Fallback { error })
            }
        }
    }

    /// One fetch. A missing table is initialized and fetched once more.
    async fn fetch(&self) -> Result<Vec<Item>, SyncError> {
        let backend = &self.inner.backend;
        match backend.select_items().await {
            Ok(items) => Ok(items),
            Err(err) if err.is_missing_table() => {
                tracing::info!(table = %self.inner.config.table, "item table missing, initializing");
                backend
                    .initialize_schema()
                    .await
                    .map_err(|e| SyncError::Initialization(e.message))?;
                backend
                    .select_items()
                    .await
                    .map_err(|e| SyncError::backend(&e))
            }
            Err(err) => Err(SyncError::backend(&err)),
        }
    }

    fn cancelled(&self) -> Result<LoadOutcome, SyncError> {
        tracing::debug!("load cancelled");
        self.inner.state.send_modify(|s| s.loading = false);
        Err(SyncError::Cancelled)
    }

    fn last_outcome(&self) -> Result<LoadOutcome, SyncError> {
        self.inner
            .last_outcome
            .lock()
            .ok()
            .and_then(|last| last.clone())
            .unwrap_or(Err(SyncError::Cancelled))
    }

    async fn try_add(&self, mut item: NewItem) -> Result<Item, SyncError> {
        item.validate()?;
        item.image_url = self.inner.images.persist(item.image_url.take()).await?;

        let backend = &self.inner.backend;
        match backend.insert_item(&item).await {
            Ok(stored) => Ok(stored),
            Err(err) if err.is_policy_violation() => {
                tracing::warn!(error = %err, "insert rejected by policy, initializing table and retrying");
                if let Err(init_err) = backend.initialize_schema().await {
                    tracing::warn!(error = %init_err, "table initialization failed");
                    return Err(SyncError::backend(&err));
                }
                backend
                    .insert_item(&item)
                    .await
                    .map_err(|e| SyncError::backend(&e))
            }
            Err(err) => Err(SyncError::backend(&err)),
        }
    }

    async fn try_update(&self, id: &ItemId, mut patch: ItemPatch) -> Result<(), SyncError> {
        patch.validate()?;
        if let Some(url) = patch.image_url.take() {
            patch.image_url = if ImageRef::parse(Some(&url)).is_local() {
                self.inner.images.persist(Some(url)).await?
            } else {
                Some(url)
            };
        }
        self.inner
            .backend
            .update_item(id, &patch)
            .await
            .map(|_| ())
            .map_err(|e| SyncError::backend(&e))
    }

    async fn reload_after_write(&self) {
        if let Err(e) = self.load().await {
            tracing::debug!(error = %e, "reload after write did not complete");
        }
    }

    fn clear_error(&self) {
        self.inner.state.send_if_modified(|s| s.error.take().is_some());
    }

    /// Log, store and announce a failed operation.
    fn report(&self, err: SyncError) -> SyncError {
        let message = err.to_string();
        match &err {
            SyncError::Upload { detail } => tracing::error!(%detail, "image upload failed"),
            other => tracing::error!(error = %other, "inventory operation failed"),
        }
        self.inner
            .state
            .send_modify(|s| s.error = Some(message.clone()));
        self.inner.notifications.error(message);
        err
    }
}

/// Sleep for `delay` unless `stop` is requested first. Returns false when
/// stopped.
async fn backoff(delay: Duration, stop: Option<&StopSignal>) -> bool {
    let Some(stop) = stop else {
        tokio::time::sleep(delay).await;
        return true;
    };
    if stop.is_requested() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = stop.requested() => false,
    }
}

/// Stop flag of one mount. Set by its [`SyncHandle`]; a dropped handle
/// counts as set.
struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    fn is_requested(&self) -> bool {
        *self.0.borrow() || self.0.has_changed().is_err()
    }

    async fn requested(&self) {
        let mut rx = self.0.clone();
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

/// Live subscription of a mounted [`InventorySync`].
///
/// Unmounting (or dropping) stops change-driven reloads, cancels a pending
/// retry of this mount and releases its change subscription.
pub struct SyncHandle {
    sync: InventorySync,
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn sync(&self) -> &InventorySync {
        &self.sync
    }

    /// Stop and wait for the reload task to finish.
    pub async fn unmount(mut self) {
        self.stop.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "inventory sync task ended abnormally");
            }
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}
