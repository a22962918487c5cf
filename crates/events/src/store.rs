//! Record store trait and implementations.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};

use silo_core::{Metadata, RecordStatus, ResourceId, ResourceRecord};

use crate::error::{Error, Result};
use crate::event::RecordEvent;
use crate::watch::RecordWatch;

/// Secret material produced when a remote resource is created
/// (e.g. generated credentials), keyed by field name.
pub type ConnectionDetails = BTreeMap<String, String>;

/// Default notification channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Trait for record storage backends.
///
/// The store owns persistence of records. The engine reads a fresh copy at
/// the start of every pass and writes back only status, metadata markers and
/// connection details; the desired spec is never modified by the engine.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Subscribe to change notifications.
    fn watch(&self) -> RecordWatch;

    /// Read a record.
    async fn get(&self, id: &ResourceId) -> Result<Option<ResourceRecord>>;

    /// Read every record.
    async fn list(&self) -> Result<Vec<ResourceRecord>>;

    /// Replace the status block of a record.
    async fn put_status(&self, id: &ResourceId, status: RecordStatus) -> Result<()>;

    /// Replace the metadata markers of a record.
    async fn put_metadata(&self, id: &ResourceId, metadata: Metadata) -> Result<()>;

    /// Publish secret material produced by a create.
    async fn publish_connection_details(
        &self,
        id: &ResourceId,
        details: ConnectionDetails,
    ) -> Result<()>;

    /// Erase a record. Called once its delete phase has succeeded.
    async fn delete(&self, id: &ResourceId) -> Result<()>;
}

/// In-memory record store.
pub struct InMemoryRecordStore {
    records: RwLock<BTreeMap<ResourceId, ResourceRecord>>,
    details: RwLock<HashMap<ResourceId, ConnectionDetails>>,
    sender: broadcast::Sender<RecordEvent>,
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl InMemoryRecordStore {
    /// Create a new in-memory record store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose notification channel holds `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            records: RwLock::new(BTreeMap::new()),
            details: RwLock::new(HashMap::new()),
            sender,
        }
    }

    /// Create a new in-memory record store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Declare or change a record, as a user would.
    ///
    /// A new record is stored as given. For an existing record only the spec
    /// and credential reference are taken over; status and markers stay, and
    /// the generation is bumped when anything changed. Returns the stored copy.
    pub async fn apply(&self, record: ResourceRecord) -> Result<ResourceRecord> {
        let mut records = self.records.write().await;
        let event = match records.get_mut(&record.id) {
            Some(existing) => {
                if existing.spec == record.spec && existing.credentials_ref == record.credentials_ref
                {
                    return Ok(existing.clone());
                }
                existing.spec = record.spec;
                existing.credentials_ref = record.credentials_ref;
                existing.generation = existing.generation.saturating_add(1);
                RecordEvent::updated(existing.clone())
            }
            None => {
                let mut record = record;
                record.generation = record.generation.max(1);
                records.insert(record.id.clone(), record.clone());
                RecordEvent::created(record)
            }
        };
        drop(records);

        let stored = event.record.clone();
        self.notify(event);
        Ok(stored)
    }

    /// Mark a record for deletion, as a user removing it would.
    pub async fn request_deletion(&self, id: &ResourceId) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or_else(|| Error::record_not_found(id))?;
        if record.deletion_requested.is_some() {
            return Ok(());
        }
        record.deletion_requested = Some(Utc::now());
        let event = RecordEvent::updated(record.clone());
        drop(records);

        self.notify(event);
        Ok(())
    }

    /// Connection details published for a record.
    pub async fn connection_details(&self, id: &ResourceId) -> Option<ConnectionDetails> {
        self.details.read().await.get(id).cloned()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn notify(&self, event: RecordEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    fn watch(&self) -> RecordWatch {
        RecordWatch::new(self.sender.subscribe())
    }

    async fn get(&self, id: &ResourceId) -> Result<Option<ResourceRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<ResourceRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn put_status(&self, id: &ResourceId, status: RecordStatus) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or_else(|| Error::record_not_found(id))?;
        record.status = status;
        Ok(())
    }

    async fn put_metadata(&self, id: &ResourceId, metadata: Metadata) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or_else(|| Error::record_not_found(id))?;
        record.metadata = metadata;
        Ok(())
    }

    async fn publish_connection_details(
        &self,
        id: &ResourceId,
        details: ConnectionDetails,
    ) -> Result<()> {
        if !self.records.read().await.contains_key(id) {
            return Err(Error::record_not_found(id));
        }
        self.details.write().await.insert(id.clone(), details);
        Ok(())
    }

    async fn delete(&self, id: &ResourceId) -> Result<()> {
        let removed = self
            .records
            .write()
            .await
            .remove(id)
            .ok_or_else(|| Error::record_not_found(id))?;
        self.details.write().await.remove(id);

        self.notify(RecordEvent::deleted(removed));
        Ok(())
    }
}

/// A wrapper that adds tracing to a record store.
pub struct TracingRecordStore<S: RecordStore> {
    inner: S,
}

impl<S: RecordStore> TracingRecordStore<S> {
    /// Create a new tracing record store.
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Access the wrapped store.
    pub const fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: RecordStore> RecordStore for TracingRecordStore<S> {
    fn watch(&self) -> RecordWatch {
        tracing::debug!("Subscribing to record changes");
        self.inner.watch()
    }

    async fn get(&self, id: &ResourceId) -> Result<Option<ResourceRecord>> {
        tracing::trace!(resource = %id, "Reading record");
        self.inner.get(id).await
    }

    async fn list(&self) -> Result<Vec<ResourceRecord>> {
        let result = self.inner.list().await;
        if let Ok(ref records) = result {
            tracing::trace!(count = records.len(), "Listed records");
        }
        result
    }

    async fn put_status(&self, id: &ResourceId, status: RecordStatus) -> Result<()> {
        tracing::debug!(
            resource = %id,
            ready = status.is_ready(),
            synced = status.is_synced(),
            "Writing status"
        );
        self.inner.put_status(id, status).await
    }

    async fn put_metadata(&self, id: &ResourceId, metadata: Metadata) -> Result<()> {
        tracing::debug!(resource = %id, markers = metadata.len(), "Writing metadata");
        self.inner.put_metadata(id, metadata).await
    }

    async fn publish_connection_details(
        &self,
        id: &ResourceId,
        details: ConnectionDetails,
    ) -> Result<()> {
        tracing::debug!(
            resource = %id,
            keys = ?details.keys().collect::<Vec<_>>(),
            "Publishing connection details"
        );
        self.inner.publish_connection_details(id, details).await
    }

    async fn delete(&self, id: &ResourceId) -> Result<()> {
        tracing::debug!(resource = %id, "Erasing record");
        self.inner.delete(id).await
    }
}
