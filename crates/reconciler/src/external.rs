//! The four-phase contract between the engine and per-kind field mapping.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use silo_core::{AtProvider, ResourceKind, ResourceRecord};
use silo_events::ConnectionDetails;

use crate::drift::Drift;
use crate::error::Result;

/// Result of a successful create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Creation {
    /// Secret material to publish through the record store.
    pub connection_details: ConnectionDetails,
    /// Identifier assigned by the remote side, when it picks one.
    pub external_name: Option<String>,
}

/// A connected client for one resource kind, valid for one pass.
#[async_trait]
pub trait ExternalClient: Send + Sync {
    /// Look the remote resource up.
    ///
    /// `Ok(None)` means it does not exist. Access and region problems are
    /// errors, never `None`.
    async fn probe(&self, record: &ResourceRecord) -> Result<Option<AtProvider>>;

    /// Compare the desired spec against what `probe` observed.
    fn diff(&self, record: &ResourceRecord, observed: &AtProvider) -> Result<Vec<Drift>>;

    /// Create the remote resource and any configuration that depends on it.
    async fn create(&self, record: &ResourceRecord) -> Result<Creation>;

    /// Finish a create that reached the remote side before the record was
    /// claimed.
    ///
    /// The resource exists; configuration applied after the initial call
    /// and any connection details must be produced again.
    async fn resume_create(&self, record: &ResourceRecord) -> Result<Creation>;

    /// Overwrite the fields flagged in `drift`.
    async fn update(&self, record: &ResourceRecord, drift: &[Drift]) -> Result<()>;

    /// Remove the remote resource.
    async fn delete(&self, record: &ResourceRecord, cancel: &CancellationToken) -> Result<()>;

    /// Release held resources.
    async fn disconnect(&self) {}
}

/// Produces [`ExternalClient`]s for one resource kind.
#[async_trait]
pub trait Connector: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Build a client for `record`. Never mutates the record.
    async fn connect(&self, record: &ResourceRecord) -> Result<Box<dyn ExternalClient>>;
}
