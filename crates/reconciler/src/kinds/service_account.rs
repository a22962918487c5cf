//! Service accounts.
//!
//! The remote side assigns the access key at creation. It is stored as the
//! record's external name and is the only way to find the account again.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use silo_core::{AtProvider, ResourceKind, ResourceRecord, ResourceSpec, ServiceAccountSpec, lock};
use silo_events::ConnectionDetails;

use crate::drift::{self, Drift, Field};
use crate::error::{ReconcileError, Result};
use crate::external::{Connector, Creation, ExternalClient};
use crate::gateway::{Gateway, Plane};
use crate::remote::{AdminPlane, NewServiceAccount, RemoteError, ServiceAccountUpdate};

pub struct ServiceAccountConnector {
    gateway: Arc<Gateway>,
}

impl ServiceAccountConnector {
    pub const fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Connector for ServiceAccountConnector {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ServiceAccount
    }

    async fn connect(&self, record: &ResourceRecord) -> Result<Box<dyn ExternalClient>> {
        let plane = self.gateway.connect(record, Plane::Admin).await?.into_admin()?;
        Ok(Box::new(ServiceAccountClient { plane }))
    }
}

struct ServiceAccountClient {
    plane: Arc<dyn AdminPlane>,
}

fn spec(record: &ResourceRecord) -> Result<&ServiceAccountSpec> {
    match &record.spec {
        ResourceSpec::ServiceAccount(spec) => Ok(spec),
        other => Err(super::wrong_kind(record, ResourceKind::ServiceAccount, other)),
    }
}

#[async_trait]
impl ExternalClient for ServiceAccountClient {
    async fn probe(&self, record: &ResourceRecord) -> Result<Option<AtProvider>> {
        let Some(access_key) = lock::external_name(&record.metadata) else {
            return Ok(None);
        };
        match self.plane.service_account_info(access_key).await {
            Ok(info) => Ok(Some(AtProvider {
                access_key: Some(access_key.to_owned()),
                parent_user: Some(info.parent_user),
                description: info.description,
                expiry: info.expiry,
                policy: info.policy,
                account_status: Some(info.status),
                ..AtProvider::default()
            })),
            Err(RemoteError::NotFound { .. }) => Ok(None),
            Err(e) => Err(ReconcileError::remote("get service account", access_key, e)),
        }
    }

    fn diff(&self, record: &ResourceRecord, observed: &AtProvider) -> Result<Vec<Drift>> {
        let spec = spec(record)?;
        let mut drift = Vec::new();
        if observed.parent_user.as_deref() != Some(spec.parent_user.as_str()) {
            drift.push(Drift::new(
                Field::ParentUser,
                format!(
                    "want {:?}, have {:?}",
                    spec.parent_user, observed.parent_user
                ),
            ));
        }
        drift.extend(drift::diff_value(
            Field::Description,
            spec.description.as_ref(),
            observed.description.as_ref(),
        ));
        drift.extend(drift::diff_value(
            Field::Expiry,
            spec.expiry.as_ref(),
            observed.expiry.as_ref(),
        ));
        if spec.policy.is_some() {
            drift.extend(drift::diff_policy(
                Field::Policy,
                spec.policy.as_deref(),
                observed.policy.as_deref(),
            )?);
        }
        Ok(drift)
    }

    async fn create(&self, record: &ResourceRecord) -> Result<Creation> {
        let spec = spec(record)?;
        if let Some(policy) = spec.policy.as_deref() {
            drift::same_object(policy, policy)?;
        }
        let request = NewServiceAccount {
            parent_user: spec.parent_user.clone(),
            name: Some(record.target_name().to_owned()),
            description: spec.description.clone(),
            expiry: spec.expiry,
            policy: spec.policy.clone(),
        };
        let credentials = self
            .plane
            .add_service_account(request)
            .await
            .map_err(|e| ReconcileError::remote("add service account", &spec.parent_user, e))?;
        info!(
            parent_user = %spec.parent_user,
            access_key = %credentials.access_key,
            "Service account created"
        );

        Ok(Creation {
            connection_details: ConnectionDetails::from([
                ("accessKey".to_owned(), credentials.access_key.clone()),
                ("secretKey".to_owned(), credentials.secret_key),
                ("parentUser".to_owned(), spec.parent_user.clone()),
            ]),
            external_name: Some(credentials.access_key),
        })
    }

    /// Never reached: without a claimed access key `probe` reports nothing,
    /// and the secret key of an unclaimed account cannot be read back.
    async fn resume_create(&self, record: &ResourceRecord) -> Result<Creation> {
        Err(ReconcileError::NotFound {
            resource: record.target_name().to_owned(),
        })
    }

    async fn update(&self, record: &ResourceRecord, drift: &[Drift]) -> Result<()> {
        let spec = spec(record)?;
        let access_key = lock::external_name(&record.metadata)
            .ok_or_else(|| ReconcileError::NotFound {
                resource: record.target_name().to_owned(),
            })?;
        if drift.iter().any(|d| d.field == Field::ParentUser) {
            return Err(ReconcileError::immutable_field(access_key, "parentUser"));
        }

        let flagged = |field: Field| drift.iter().any(|d| d.field == field);
        let update = ServiceAccountUpdate {
            description: spec
                .description
                .clone()
                .filter(|_| flagged(Field::Description)),
            expiry: spec.expiry.filter(|_| flagged(Field::Expiry)),
            policy: spec.policy.clone().filter(|_| flagged(Field::Policy)),
        };
        if update.is_empty() {
            return Ok(());
        }
        self.plane
            .update_service_account(access_key, update)
            .await
            .map_err(|e| ReconcileError::remote("update service account", access_key, e))
    }

    async fn delete(&self, record: &ResourceRecord, _cancel: &CancellationToken) -> Result<()> {
        let Some(access_key) = lock::external_name(&record.metadata) else {
            return Ok(());
        };
        self.plane
            .delete_service_account(access_key)
            .await
            .map_err(|e| ReconcileError::remote("delete service account", access_key, e))
    }
}
