//! Buckets.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use silo_core::{AtProvider, BucketSpec, DeletionPolicy, ResourceKind, ResourceRecord, ResourceSpec};
use silo_events::ConnectionDetails;

use crate::deletion::{self, DeletionSettings};
use crate::drift::{self, Drift, Field};
use crate::error::{ReconcileError, Result};
use crate::external::{Connector, Creation, ExternalClient};
use crate::gateway::{Gateway, Plane};
use crate::remote::{DataPlane, RemoteError};

pub struct BucketConnector {
    gateway: Arc<Gateway>,
    deletion: DeletionSettings,
}

impl BucketConnector {
    pub const fn new(gateway: Arc<Gateway>, deletion: DeletionSettings) -> Self {
        Self { gateway, deletion }
    }
}

#[async_trait]
impl Connector for BucketConnector {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Bucket
    }

    async fn connect(&self, record: &ResourceRecord) -> Result<Box<dyn ExternalClient>> {
        let plane = self.gateway.connect(record, Plane::Data).await?.into_data()?;
        Ok(Box::new(BucketClient {
            plane,
            deletion: self.deletion,
        }))
    }
}

struct BucketClient {
    plane: Arc<dyn DataPlane>,
    deletion: DeletionSettings,
}

fn spec(record: &ResourceRecord) -> Result<&BucketSpec> {
    match &record.spec {
        ResourceSpec::Bucket(spec) => Ok(spec),
        other => Err(super::wrong_kind(record, ResourceKind::Bucket, other)),
    }
}

impl BucketClient {
    /// Everything a create does once the bucket exists.
    async fn configure(&self, name: &str, spec: &BucketSpec) -> Result<Creation> {
        if let Some(policy) = spec.policy.as_deref().filter(|p| !p.trim().is_empty()) {
            self.plane
                .set_bucket_policy(name, policy)
                .await
                .map_err(|e| ReconcileError::remote("set bucket policy", name, e))?;
        }

        let connection_details = ConnectionDetails::from([
            ("bucket".to_owned(), name.to_owned()),
            ("region".to_owned(), spec.region().to_owned()),
        ]);
        Ok(Creation {
            connection_details,
            external_name: None,
        })
    }
}

#[async_trait]
impl ExternalClient for BucketClient {
    async fn probe(&self, record: &ResourceRecord) -> Result<Option<AtProvider>> {
        let name = record.target_name();
        let exists = self
            .plane
            .bucket_exists(name)
            .await
            .map_err(|e| ReconcileError::remote("bucket exists", name, e))?;
        if !exists {
            return Ok(None);
        }

        let policy = match self.plane.bucket_policy(name).await {
            Ok(policy) => policy,
            Err(RemoteError::NotFound { .. }) => None,
            Err(e) => return Err(ReconcileError::remote("get bucket policy", name, e)),
        };
        Ok(Some(AtProvider {
            bucket_name: Some(name.to_owned()),
            policy,
            ..AtProvider::default()
        }))
    }

    fn diff(&self, record: &ResourceRecord, observed: &AtProvider) -> Result<Vec<Drift>> {
        let spec = spec(record)?;
        Ok(drift::diff_policy(
            Field::Policy,
            spec.policy.as_deref(),
            observed.policy.as_deref(),
        )?
        .into_iter()
        .collect())
    }

    async fn create(&self, record: &ResourceRecord) -> Result<Creation> {
        let spec = spec(record)?;
        let name = record.target_name();
        self.plane
            .make_bucket(name, spec.region())
            .await
            .map_err(|e| ReconcileError::remote("make bucket", name, e))?;
        info!(bucket = name, region = spec.region(), "Bucket created");
        self.configure(name, spec).await
    }

    async fn resume_create(&self, record: &ResourceRecord) -> Result<Creation> {
        let spec = spec(record)?;
        let name = record.target_name();
        info!(bucket = name, "Resuming bucket configuration");
        self.configure(name, spec).await
    }

    async fn update(&self, record: &ResourceRecord, drift: &[Drift]) -> Result<()> {
        let spec = spec(record)?;
        let name = record.target_name();
        if drift.iter().any(|d| d.field == Field::Policy) {
            let policy = spec.policy.as_deref().unwrap_or_default();
            self.plane
                .set_bucket_policy(name, policy)
                .await
                .map_err(|e| ReconcileError::remote("set bucket policy", name, e))?;
        }
        Ok(())
    }

    async fn delete(&self, record: &ResourceRecord, cancel: &CancellationToken) -> Result<()> {
        let spec = spec(record)?;
        let name = record.target_name();
        match spec.deletion_policy {
            DeletionPolicy::DeleteIfEmpty => self
                .plane
                .remove_bucket(name)
                .await
                .map_err(|e| ReconcileError::remote("remove bucket", name, e)),
            DeletionPolicy::DeleteAll => {
                deletion::drain_and_delete(self.plane.clone(), name, self.deletion, cancel)
                    .await
                    .map(|_| ())
            }
        }
    }
}
