//! Users.

use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use silo_core::{AtProvider, ResourceKind, ResourceRecord, ResourceSpec, UserSpec};
use silo_events::ConnectionDetails;

use crate::drift::{self, Drift, Field};
use crate::error::{ReconcileError, Result};
use crate::external::{Connector, Creation, ExternalClient};
use crate::gateway::{Gateway, Plane};
use crate::remote::{AdminPlane, RemoteError};

const SECRET_LENGTH: usize = 40;

/// How a user's desired policies are applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyBinding {
    /// Overwrite the attached set with exactly the desired policies.
    #[default]
    Replace,
    /// Attach missing policies and detach extra ones.
    Attach,
}

pub struct UserConnector {
    gateway: Arc<Gateway>,
    binding: PolicyBinding,
}

impl UserConnector {
    pub const fn new(gateway: Arc<Gateway>, binding: PolicyBinding) -> Self {
        Self { gateway, binding }
    }
}

#[async_trait]
impl Connector for UserConnector {
    fn kind(&self) -> ResourceKind {
        ResourceKind::User
    }

    async fn connect(&self, record: &ResourceRecord) -> Result<Box<dyn ExternalClient>> {
        let plane = self.gateway.connect(record, Plane::Admin).await?.into_admin()?;
        Ok(Box::new(UserClient {
            plane,
            binding: self.binding,
        }))
    }
}

struct UserClient {
    plane: Arc<dyn AdminPlane>,
    binding: PolicyBinding,
}

fn spec(record: &ResourceRecord) -> Result<&UserSpec> {
    match &record.spec {
        ResourceSpec::User(spec) => Ok(spec),
        other => Err(super::wrong_kind(record, ResourceKind::User, other)),
    }
}

fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LENGTH)
        .map(char::from)
        .collect()
}

impl UserClient {
    /// Fail with a terminal error when a desired policy does not exist.
    async fn check_policies_exist(&self, policies: &[String]) -> Result<()> {
        if policies.is_empty() {
            return Ok(());
        }
        let known = self
            .plane
            .list_canned_policies()
            .await
            .map_err(|e| ReconcileError::remote("list policies", "policies", e))?;
        match policies.iter().find(|p| !known.contains(*p)) {
            Some(missing) => Err(ReconcileError::missing_dependency("policy", missing.clone())),
            None => Ok(()),
        }
    }

    /// Set a fresh secret and the desired policies.
    ///
    /// `add_user` is an upsert, so this serves both a first create and a
    /// create resumed after the user already exists.
    async fn register(&self, record: &ResourceRecord, message: &str) -> Result<Creation> {
        let spec = spec(record)?;
        let name = record.target_name();
        self.check_policies_exist(&spec.policies).await?;

        let secret = generate_secret();
        self.plane
            .add_user(name, &secret)
            .await
            .map_err(|e| ReconcileError::remote("add user", name, e))?;
        info!(user = name, "{message}");

        if !spec.policies.is_empty() {
            self.apply_policies(name, &spec.policies).await?;
        }

        Ok(Creation {
            connection_details: ConnectionDetails::from([
                ("username".to_owned(), name.to_owned()),
                ("password".to_owned(), secret),
            ]),
            external_name: None,
        })
    }

    async fn apply_policies(&self, user: &str, desired: &[String]) -> Result<()> {
        match self.binding {
            PolicyBinding::Replace => self
                .plane
                .set_user_policies(user, desired)
                .await
                .map_err(|e| ReconcileError::remote("set user policies", user, e)),
            PolicyBinding::Attach => {
                let current = self
                    .plane
                    .user_info(user)
                    .await
                    .map_err(|e| ReconcileError::remote("get user", user, e))?
                    .policies;
                let attach: Vec<String> = desired
                    .iter()
                    .filter(|p| !current.contains(*p))
                    .unique()
                    .cloned()
                    .collect();
                let detach: Vec<String> = current
                    .iter()
                    .filter(|p| !desired.contains(*p))
                    .cloned()
                    .collect();
                if !attach.is_empty() {
                    self.plane
                        .attach_user_policies(user, &attach)
                        .await
                        .map_err(|e| ReconcileError::remote("attach user policies", user, e))?;
                }
                if !detach.is_empty() {
                    self.plane
                        .detach_user_policies(user, &detach)
                        .await
                        .map_err(|e| ReconcileError::remote("detach user policies", user, e))?;
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ExternalClient for UserClient {
    async fn probe(&self, record: &ResourceRecord) -> Result<Option<AtProvider>> {
        let name = record.target_name();
        match self.plane.user_info(name).await {
            Ok(info) => Ok(Some(AtProvider {
                user_name: Some(name.to_owned()),
                policies: info.policies.into_iter().sorted().collect(),
                account_status: Some(info.status),
                ..AtProvider::default()
            })),
            Err(RemoteError::NotFound { .. }) => Ok(None),
            Err(e) => Err(ReconcileError::remote("get user", name, e)),
        }
    }

    fn diff(&self, record: &ResourceRecord, observed: &AtProvider) -> Result<Vec<Drift>> {
        let spec = spec(record)?;
        Ok(
            drift::diff_sets(Field::Policies, &spec.policies, &observed.policies)
                .into_iter()
                .collect(),
        )
    }

    async fn create(&self, record: &ResourceRecord) -> Result<Creation> {
        self.register(record, "User created").await
    }

    async fn resume_create(&self, record: &ResourceRecord) -> Result<Creation> {
        // The secret from the interrupted call was never published.
        self.register(record, "User secret reset").await
    }

    async fn update(&self, record: &ResourceRecord, drift: &[Drift]) -> Result<()> {
        let spec = spec(record)?;
        if drift.iter().any(|d| d.field == Field::Policies) {
            self.check_policies_exist(&spec.policies).await?;
            self.apply_policies(record.target_name(), &spec.policies).await?;
        }
        Ok(())
    }

    async fn delete(&self, record: &ResourceRecord, _cancel: &CancellationToken) -> Result<()> {
        let name = record.target_name();
        self.plane
            .remove_user(name)
            .await
            .map_err(|e| ReconcileError::remote("remove user", name, e))
    }
}
