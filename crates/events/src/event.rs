//! Record change notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use silo_core::{ResourceId, ResourceRecord};

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// A new record was declared.
    Created,
    /// The desired spec changed or deletion was requested.
    Updated,
    /// The record was erased from the store.
    Deleted,
}

/// A change notification carrying a snapshot of the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordEvent {
    pub record: ResourceRecord,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

impl RecordEvent {
    fn new(record: ResourceRecord, kind: EventKind) -> Self {
        Self {
            record,
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Create a created event.
    pub fn created(record: ResourceRecord) -> Self {
        Self::new(record, EventKind::Created)
    }

    /// Create an updated event.
    pub fn updated(record: ResourceRecord) -> Self {
        Self::new(record, EventKind::Updated)
    }

    /// Create a deleted event.
    pub fn deleted(record: ResourceRecord) -> Self {
        Self::new(record, EventKind::Deleted)
    }

    /// Id of the record the event is about.
    pub const fn id(&self) -> &ResourceId {
        &self.record.id
    }

    /// Get the event kind as a string.
    pub const fn kind_name(&self) -> &'static str {
        match self.kind {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
        }
    }
}
