//! Record store and change notifications for silo.
//!
//! The store is the only shared mutable state the engine touches:
//!
//! - **Record store**: read records, write back status, markers and
//!   connection details, erase records after their delete phase
//! - **Watch**: broadcast notifications of created, updated and deleted records
//! - **In-memory store**: a complete implementation used by the binary and tests
//!
//! # Example
//!
//! ```ignore
//! use silo_core::{BucketSpec, ResourceId, ResourceRecord, ResourceSpec};
//! use silo_events::{InMemoryRecordStore, RecordStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryRecordStore::new_arc();
//!     let mut watch = store.watch();
//!
//!     let record = ResourceRecord::new(
//!         ResourceId::new("logs"),
//!         ResourceSpec::Bucket(BucketSpec::default()),
//!     );
//!     store.apply(record).await.ok();
//!
//!     if let Ok(event) = watch.recv().await {
//!         println!("{} {}", event.kind_name(), event.id());
//!     }
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod error;
pub mod event;
pub mod store;
pub mod watch;

// Re-export main types
pub use error::{Error, Result};
pub use event::{EventKind, RecordEvent};
pub use store::{
    ConnectionDetails, DEFAULT_CHANNEL_CAPACITY, InMemoryRecordStore, RecordStore,
    TracingRecordStore,
};
pub use watch::RecordWatch;
