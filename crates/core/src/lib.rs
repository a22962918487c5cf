//! Resource records for silo.
//!
//! This crate holds the data every other silo crate passes around:
//!
//! - **Specs**: desired configuration for buckets, users, policies and
//!   service accounts
//! - **Records**: a spec plus identity, metadata markers and observed status
//! - **Status**: Ready/Synced conditions and fields observed remotely
//! - **Lock**: the metadata markers that decide who owns a remote resource
//!
//! # Example
//!
//! ```ignore
//! use silo_core::{lock, BucketSpec, ResourceId, ResourceRecord, ResourceSpec};
//!
//! let mut record = ResourceRecord::new(
//!     ResourceId::new("logs"),
//!     ResourceSpec::Bucket(BucketSpec::default()),
//! );
//! assert!(!lock::is_claimed(&record.metadata));
//! lock::claim(&mut record.metadata);
//! assert!(lock::is_claimed(&record.metadata));
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod error;
pub mod lock;
pub mod record;
pub mod result;
pub mod spec;
pub mod status;

pub use error::{Error, Result};
pub use record::{Metadata, ResourceId, ResourceRecord};
pub use result::ResultExt;
pub use spec::{
    BucketSpec, DEFAULT_REGION, DeletionPolicy, PolicySpec, ResourceKind, ResourceSpec,
    ServiceAccountSpec, UserSpec,
};
pub use status::{AtProvider, Condition, ConditionKind, Reason, RecordStatus};
