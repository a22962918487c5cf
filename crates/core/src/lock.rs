//! Ownership markers stored in a record's metadata.
//!
//! A record owns its remote resource only once [`LOCK_KEY`] is present.
//! The lock is written after a successful create and never before, so a
//! resource that already exists remotely without this marker belongs to
//! someone else and must not be adopted.
//!
//! [`CREATE_PENDING_KEY`] is written before the create call is issued. If the
//! process dies between the remote create and persisting the lock, the next
//! pass sees the pending marker and finishes the claim instead of reporting a
//! name collision.

use crate::record::Metadata;

/// Marker key proving this record created (and owns) its remote resource.
pub const LOCK_KEY: &str = "silo.io/lock";

/// Value written under [`LOCK_KEY`]. Only presence is significant.
pub const LOCK_VALUE: &str = "claimed";

/// Marker key recording that a create call is in flight.
pub const CREATE_PENDING_KEY: &str = "silo.io/create-pending";

/// Marker key holding a remote-assigned identifier (e.g. an access key).
pub const EXTERNAL_NAME_KEY: &str = "silo.io/external-name";

/// Record ownership of the remote resource and drop any pending marker.
pub fn claim(metadata: &mut Metadata) {
    metadata.insert(LOCK_KEY, LOCK_VALUE);
    metadata.remove(CREATE_PENDING_KEY);
}

/// Whether the record owns its remote resource.
pub fn is_claimed(metadata: &Metadata) -> bool {
    metadata.contains(LOCK_KEY)
}

/// Record that a create call is about to be issued.
pub fn mark_create_pending(metadata: &mut Metadata) {
    metadata.insert(CREATE_PENDING_KEY, "true");
}

pub fn is_create_pending(metadata: &Metadata) -> bool {
    metadata.contains(CREATE_PENDING_KEY)
}

pub fn clear_create_pending(metadata: &mut Metadata) {
    metadata.remove(CREATE_PENDING_KEY);
}

/// Remote identifier assigned at creation, if any.
pub fn external_name(metadata: &Metadata) -> Option<&str> {
    metadata.get(EXTERNAL_NAME_KEY).filter(|name| !name.is_empty())
}

pub fn set_external_name(metadata: &mut Metadata, name: impl Into<String>) {
    metadata.insert(EXTERNAL_NAME_KEY, name);
}
