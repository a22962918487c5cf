//! Reconciliation engine for object-storage resources.
//!
//! Each record in the store declares a remote resource. A reconcile pass
//! drives that resource toward the declaration in four phases:
//!
//! - **Connect**: the [`Gateway`] resolves credentials and builds a client
//! - **Observe**: the drift detector probes the remote side and diffs it
//! - **Create / Update / Delete**: the core runs whichever phase applies
//! - **Disconnect**: the client is released at the end of the pass
//!
//! # Ownership
//!
//! A record owns a remote resource only once it carries the adoption lock
//! marker, written after a confirmed create. A remote resource with the same
//! name but no marker is a name collision and is never adopted.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use silo_events::InMemoryRecordStore;
//! use silo_reconciler::{
//!     ConnectorRegistry, Controller, ControllerSettings, Gateway, KindSettings,
//!     MemoryClientFactory, Profile, ProfileResolver, Reconciler, register_all,
//!     remote::memory::InMemoryControlPlane,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryRecordStore::new_arc();
//!     let gateway = Arc::new(Gateway::new(
//!         Arc::new(ProfileResolver::single(Profile::new(
//!             "http://localhost:9000", "minio", "minio123",
//!         ))),
//!         Arc::new(MemoryClientFactory::new(InMemoryControlPlane::new_arc())),
//!     ));
//!     let registry = register_all(ConnectorRegistry::builder(), &gateway, KindSettings::default())
//!         .build();
//!
//!     let reconciler = Reconciler::new(store, Arc::new(registry));
//!     let controller = Controller::new(reconciler, ControllerSettings::default());
//!     controller.run(CancellationToken::new()).await;
//! }
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod controller;
pub mod deletion;
pub mod drift;
pub mod error;
pub mod external;
pub mod gateway;
pub mod kinds;
pub mod reconciler;
pub mod registry;
pub mod remote;

// Re-export main types
pub use controller::{Controller, ControllerSettings, WorkQueue};
pub use deletion::{DeletionSettings, DrainReport, drain_and_delete};
pub use drift::{Drift, Field, Observation, observe, same_object};
pub use error::{ConnectError, ErrorClass, ReconcileError, ResolveError, Result};
pub use external::{Connector, Creation, ExternalClient};
pub use gateway::{
    Client, ClientFactory, Connection, ConnectionParameters, ConnectionResolver, Gateway,
    MemoryClientFactory, Plane, Profile, ProfileResolver, TlsMaterial,
};
pub use kinds::{KindSettings, PolicyBinding, allow_bucket_policy, register_all};
pub use reconciler::{Outcome, Plan, Reconciler};
pub use registry::{ConnectorRegistry, ConnectorRegistryBuilder};
