//! Canned policies.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use silo_core::{AtProvider, Error as RecordError, PolicySpec, ResourceKind, ResourceRecord, ResourceSpec};

use crate::drift::{self, Drift, Field};
use crate::error::{ReconcileError, Result};
use crate::external::{Connector, Creation, ExternalClient};
use crate::gateway::{Gateway, Plane};
use crate::remote::{AdminPlane, RemoteError};

pub struct PolicyConnector {
    gateway: Arc<Gateway>,
}

impl PolicyConnector {
    pub const fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Connector for PolicyConnector {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Policy
    }

    async fn connect(&self, record: &ResourceRecord) -> Result<Box<dyn ExternalClient>> {
        let plane = self.gateway.connect(record, Plane::Admin).await?.into_admin()?;
        Ok(Box::new(PolicyClient { plane }))
    }
}

struct PolicyClient {
    plane: Arc<dyn AdminPlane>,
}

fn spec(record: &ResourceRecord) -> Result<&PolicySpec> {
    match &record.spec {
        ResourceSpec::Policy(spec) => Ok(spec),
        other => Err(super::wrong_kind(record, ResourceKind::Policy, other)),
    }
}

/// A policy allowing every action on `bucket` and its objects.
pub fn allow_bucket_policy(bucket: &str) -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Action": ["s3:*"],
            "Resource": [
                format!("arn:aws:s3:::{bucket}"),
                format!("arn:aws:s3:::{bucket}/*"),
            ],
        }],
    })
    .to_string()
}

/// The document a policy record asks for.
pub fn desired_document(record: &ResourceRecord) -> Result<String> {
    let spec = spec(record)?;
    let allow = spec.allow_bucket.as_deref().filter(|b| !b.is_empty());
    let raw = spec.raw_policy.as_deref().filter(|p| !p.is_empty());
    match (allow, raw) {
        (Some(bucket), None) => Ok(allow_bucket_policy(bucket)),
        (None, Some(raw)) => Ok(raw.to_owned()),
        _ => Err(RecordError::exclusive_fields(record.id.to_string(), "allowBucket, rawPolicy").into()),
    }
}

#[async_trait]
impl ExternalClient for PolicyClient {
    async fn probe(&self, record: &ResourceRecord) -> Result<Option<AtProvider>> {
        let name = record.target_name();
        match self.plane.canned_policy(name).await {
            Ok(document) => Ok(Some(AtProvider {
                policy_name: Some(name.to_owned()),
                policy: Some(document),
                ..AtProvider::default()
            })),
            Err(RemoteError::NotFound { .. }) => Ok(None),
            Err(e) => Err(ReconcileError::remote("get policy", name, e)),
        }
    }

    fn diff(&self, record: &ResourceRecord, observed: &AtProvider) -> Result<Vec<Drift>> {
        let desired = desired_document(record)?;
        Ok(
            drift::diff_policy(Field::Policy, Some(&desired), observed.policy.as_deref())?
                .into_iter()
                .collect(),
        )
    }

    async fn create(&self, record: &ResourceRecord) -> Result<Creation> {
        let document = desired_document(record)?;
        // Reject before sending, so a typo surfaces as malformed-policy.
        drift::same_object(&document, &document)?;
        let name = record.target_name();
        self.plane
            .add_canned_policy(name, &document)
            .await
            .map_err(|e| ReconcileError::remote("add policy", name, e))?;
        info!(policy = name, "Policy created");
        Ok(Creation::default())
    }

    async fn resume_create(&self, record: &ResourceRecord) -> Result<Creation> {
        // add_canned_policy overwrites, so the stored document ends up as declared.
        self.create(record).await
    }

    async fn update(&self, record: &ResourceRecord, drift: &[Drift]) -> Result<()> {
        if drift.is_empty() {
            return Ok(());
        }
        let document = desired_document(record)?;
        let name = record.target_name();
        self.plane
            .add_canned_policy(name, &document)
            .await
            .map_err(|e| ReconcileError::remote("update policy", name, e))
    }

    async fn delete(&self, record: &ResourceRecord, _cancel: &CancellationToken) -> Result<()> {
        let name = record.target_name();
        self.plane
            .remove_canned_policy(name)
            .await
            .map_err(|e| ReconcileError::remote("remove policy", name, e))
    }
}
