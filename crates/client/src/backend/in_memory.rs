use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};

use stockbook_core::{Entity, RecordId};
use stockbook_inventory::{sort_newest_first, Item, ItemId, ItemPatch, NewItem};

use super::{BackendError, ObjectUpload, RemoteDataService};
use crate::config::{DEFAULT_BUCKET, DEFAULT_TABLE};
use crate::realtime::{ChangeEvent, ChangeFeed, ChangeKind, ChangeSubscription};

/// Operations that can be observed and scripted to fail.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    Select,
    Probe,
    Insert,
    Update,
    Delete,
    InitSchema,
    Upload,
}

/// An object held by the in-memory bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: String,
    pub cache_control: String,
}

/// In-process data service.
///
/// Intended for tests/dev. Behaves like the hosted store as far as the client
/// can tell: assigns ids and timestamps, emits change events on writes, keeps
/// uploaded objects, and can be scripted to fail.
#[derive(Debug)]
pub struct InMemoryBackend {
    table: String,
    public_base: String,
    rows: RwLock<Vec<Item>>,
    objects: RwLock<HashMap<String, StoredObject>>,
    schema_ready: AtomicBool,
    faults: Mutex<HashMap<Operation, VecDeque<BackendError>>>,
    calls: Mutex<HashMap<Operation, usize>>,
    last_added: Mutex<Option<DateTime<Utc>>>,
    changes: ChangeFeed,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            public_base: format!("memory://storage/{DEFAULT_BUCKET}"),
            rows: RwLock::new(Vec::new()),
            objects: RwLock::new(HashMap::new()),
            schema_ready: AtomicBool::new(true),
            faults: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            last_added: Mutex::new(None),
            changes: ChangeFeed::default(),
        }
    }

    /// A store whose item table does not exist until `initialize_schema`.
    pub fn without_schema() -> Self {
        let backend = Self::new();
        backend.schema_ready.store(false, Ordering::SeqCst);
        backend
    }

    /// Seed rows as-is (ids and dates are kept).
    pub fn with_items(self, items: impl IntoIterator<Item = Item>) -> Self {
        if let Ok(mut rows) = self.rows.write() {
            rows.extend(items);
        }
        self
    }

    /// Fail the next call of `op` with `err`. Queued failures are consumed in
    /// order, one per call.
    pub fn fail_next(&self, op: Operation, err: BackendError) {
        self.fail_times(op, 1, err);
    }

    pub fn fail_times(&self, op: Operation, times: usize, err: BackendError) {
        if let Ok(mut faults) = self.faults.lock() {
            let queue = faults.entry(op).or_default();
            queue.extend(std::iter::repeat_n(err, times));
        }
    }

    /// How many times `op` has been called (failed calls included).
    pub fn calls(&self, op: Operation) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(&op).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Persisted rows in insertion order.
    pub fn items(&self) -> Vec<Item> {
        self.rows.read().map(|rows| rows.clone()).unwrap_or_default()
    }

    pub fn item(&self, id: &ItemId) -> Option<Item> {
        self.items().into_iter().find(|item| item.id() == id)
    }

    pub fn object(&self, path: &str) -> Option<StoredObject> {
        self.objects.read().ok()?.get(path).cloned()
    }

    pub fn schema_ready(&self) -> bool {
        self.schema_ready.load(Ordering::SeqCst)
    }

    /// Live change subscriptions.
    pub fn change_subscribers(&self) -> usize {
        self.changes.subscriber_count()
    }

    /// Insert a row as another client would: the write is not attributed to
    /// any local caller, only the change event is seen.
    pub fn insert_external(&self, item: &NewItem) -> Result<Item, BackendError> {
        self.insert_row(item)
    }

    fn record_call(&self, op: Operation) -> Result<(), BackendError> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(op).or_default() += 1;
        }
        let fault = self
            .faults
            .lock()
            .map_err(|_| poisoned())?
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        match fault {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn ensure_schema(&self) -> Result<(), BackendError> {
        if self.schema_ready() {
            Ok(())
        } else {
            Err(BackendError::missing_table(&self.table))
        }
    }

    /// Strictly increasing creation timestamps, even within one clock tick.
    fn next_timestamp(&self) -> Result<String, BackendError> {
        let mut last = self.last_added.lock().map_err(|_| poisoned())?;
        let mut now = Utc::now();
        if let Some(prev) = *last {
            if now <= prev {
                now = prev + chrono::Duration::microseconds(1);
            }
        }
        *last = Some(now);
        Ok(now.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    fn insert_row(&self, new_item: &NewItem) -> Result<Item, BackendError> {
        self.ensure_schema()?;
        let item = Item {
            id: ItemId::new(RecordId::new()),
            title: new_item.title.clone(),
            purchase_price: new_item.purchase_price,
            selling_price: new_item.selling_price,
            quantity: new_item.quantity,
            category: new_item.category.clone(),
            supplier: new_item.supplier.clone(),
            date_added: Some(self.next_timestamp()?),
            image_url: new_item.image_url.clone(),
        };
        self.rows.write().map_err(|_| poisoned())?.push(item.clone());
        self.publish(ChangeKind::Insert, item.id);
        Ok(item)
    }

    fn publish(&self, kind: ChangeKind, id: ItemId) {
        self.changes
            .publish(ChangeEvent::new(self.table.clone(), kind, Some(id)));
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteDataService for InMemoryBackend {
    async fn select_items(&self) -> Result<Vec<Item>, BackendError> {
        self.record_call(Operation::Select)?;
        self.ensure_schema()?;
        let mut items = self.items();
        sort_newest_first(&mut items);
        Ok(items)
    }

    async fn probe_items(&self) -> Result<(), BackendError> {
        self.record_call(Operation::Probe)?;
        self.ensure_schema()
    }

    async fn insert_item(&self, item: &NewItem) -> Result<Item, BackendError> {
        self.record_call(Operation::Insert)?;
        self.insert_row(item)
    }

    async fn update_item(&self, id: &ItemId, patch: &ItemPatch) -> Result<Item, BackendError> {
        self.record_call(Operation::Update)?;
        self.ensure_schema()?;
        let updated = {
            let mut rows = self.rows.write().map_err(|_| poisoned())?;
            let row = rows
                .iter_mut()
                .find(|row| row.id() == id)
                .ok_or_else(|| no_rows(id))?;
            row.apply_patch(patch);
            row.clone()
        };
        self.publish(ChangeKind::Update, *id);
        Ok(updated)
    }

    async fn delete_item(&self, id: &ItemId) -> Result<(), BackendError> {
        self.record_call(Operation::Delete)?;
        self.ensure_schema()?;
        {
            let mut rows = self.rows.write().map_err(|_| poisoned())?;
            let before = rows.len();
            rows.retain(|row| row.id() != id);
            if rows.len() == before {
                return Err(no_rows(id));
            }
        }
        self.publish(ChangeKind::Delete, *id);
        Ok(())
    }

    async fn initialize_schema(&self) -> Result<(), BackendError> {
        self.record_call(Operation::InitSchema)?;
        self.schema_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn upload_object(&self, upload: ObjectUpload) -> Result<(), BackendError> {
        self.record_call(Operation::Upload)?;
        let mut objects = self.objects.write().map_err(|_| poisoned())?;
        if !upload.upsert && objects.contains_key(&upload.path) {
            return Err(BackendError::new("The resource already exists").with_code("409"));
        }
        objects.insert(
            upload.path,
            StoredObject {
                bytes: upload.bytes,
                content_type: upload.content_type,
                cache_control: upload.cache_control,
            },
        );
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.public_base, path)
    }

    fn subscribe_changes(&self, table: &str) -> ChangeSubscription {
        self.changes.subscribe(table)
    }
}

fn poisoned() -> BackendError {
    BackendError::new("in-memory store lock poisoned")
}

fn no_rows(id: &ItemId) -> BackendError {
    BackendError::new(format!("no row with id {id}")).with_code("PGRST116")
}
