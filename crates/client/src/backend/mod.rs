//! Remote data service seam.
//!
//! The hosted store is consumed through [`RemoteDataService`]: table
//! query/insert/update/delete, a schema-initialization procedure, object
//! storage, and a change feed. The client is handed an
//! `Arc<dyn RemoteDataService>` at startup and never reaches for a global.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use stockbook_inventory::{Item, ItemId, ItemPatch, NewItem};

use crate::realtime::ChangeSubscription;

pub mod in_memory;
#[cfg(feature = "rest")]
pub mod rest;
#[cfg(feature = "rest")]
mod socket;

pub use in_memory::{InMemoryBackend, Operation, StoredObject};
#[cfg(feature = "rest")]
pub use rest::RestBackend;

/// Error reported by the data service.
///
/// The service reports failures as free-form messages; callers classify them
/// by substring (see [`BackendError::is_missing_table`] and
/// [`BackendError::is_policy_violation`]).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
    /// Service error code when one was reported (e.g. a SQLSTATE).
    pub code: Option<String>,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Transport-level failure (request never produced a service response).
    pub fn transport(err: impl core::fmt::Display) -> Self {
        Self::new(format!("network error: {err}"))
    }

    /// The item table has not been created yet.
    pub fn missing_table(table: &str) -> Self {
        Self::new(format!("relation \"public.{table}\" does not exist")).with_code("42P01")
    }

    /// A row-level security policy rejected the write.
    pub fn policy_violation(table: &str) -> Self {
        Self::new(format!(
            "new row violates row-level security policy for table \"{table}\""
        ))
        .with_code("42501")
    }

    pub fn is_missing_table(&self) -> bool {
        self.message.contains("does not exist")
    }

    pub fn is_policy_violation(&self) -> bool {
        let message = self.message.to_ascii_lowercase();
        message.contains("policy") || message.contains("permission denied")
    }
}

/// An object to put into the image bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUpload {
    /// Path inside the bucket.
    pub path: String,
    pub bytes: Bytes,
    pub content_type: String,
    /// `Cache-Control` max-age in seconds.
    pub cache_control: String,
    /// Overwrite an existing object at `path`.
    pub upsert: bool,
}

/// The hosted store the inventory is synced against.
#[async_trait]
pub trait RemoteDataService: Send + Sync {
    /// All items, newest first by `date_added`.
    async fn select_items(&self) -> Result<Vec<Item>, BackendError>;

    /// Cheapest possible read of the item table (one id at most).
    async fn probe_items(&self) -> Result<(), BackendError>;

    /// Insert and return the stored row (with its assigned id and date).
    async fn insert_item(&self, item: &NewItem) -> Result<Item, BackendError>;

    /// Write the present fields of `patch` to the row with `id`.
    async fn update_item(&self, id: &ItemId, patch: &ItemPatch) -> Result<Item, BackendError>;

    async fn delete_item(&self, id: &ItemId) -> Result<(), BackendError>;

    /// Remote procedure that creates the item table and its policies.
    async fn initialize_schema(&self) -> Result<(), BackendError>;

    async fn upload_object(&self, upload: ObjectUpload) -> Result<(), BackendError>;

    /// Public address of an object in the image bucket.
    fn public_url(&self, path: &str) -> String;

    /// Change events for `table` (all event types).
    fn subscribe_changes(&self, table: &str) -> ChangeSubscription;
}
