//! Field mapping for each resource kind.

mod bucket;
mod policy;
mod service_account;
mod user;

use std::sync::Arc;

use silo_core::{ResourceKind, ResourceRecord, ResourceSpec};

use crate::deletion::DeletionSettings;
use crate::error::ReconcileError;
use crate::gateway::Gateway;
use crate::registry::ConnectorRegistryBuilder;

pub use bucket::BucketConnector;
pub use policy::{PolicyConnector, allow_bucket_policy};
pub use service_account::ServiceAccountConnector;
pub use user::{PolicyBinding, UserConnector};

/// Knobs the per-kind connectors take from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindSettings {
    pub deletion: DeletionSettings,
    pub policy_binding: PolicyBinding,
}

/// Register a connector for every kind, all sharing one gateway.
pub fn register_all(
    builder: ConnectorRegistryBuilder,
    gateway: &Arc<Gateway>,
    settings: KindSettings,
) -> ConnectorRegistryBuilder {
    builder
        .register(Arc::new(BucketConnector::new(
            gateway.clone(),
            settings.deletion,
        )))
        .register(Arc::new(UserConnector::new(
            gateway.clone(),
            settings.policy_binding,
        )))
        .register(Arc::new(PolicyConnector::new(gateway.clone())))
        .register(Arc::new(ServiceAccountConnector::new(gateway.clone())))
}

pub(crate) fn wrong_kind(
    record: &ResourceRecord,
    expected: ResourceKind,
    other: &ResourceSpec,
) -> ReconcileError {
    silo_core::Error::invalid_record(
        record.id.to_string(),
        format!("expected a {expected} spec, got {}", other.kind()),
    )
    .into()
}
