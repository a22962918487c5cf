//! Resource records: identity, desired spec, observed status and markers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::spec::{ResourceKind, ResourceSpec};
use crate::status::RecordStatus;

/// Unique identity of a record in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceId {
    /// Create a cluster-scoped id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Create a namespaced id.
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Free-form key/value markers attached to a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    /// Create an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Set a marker, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A declared resource together with everything the engine knows about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    #[serde(flatten)]
    pub id: ResourceId,
    /// Connection profile to use instead of the default one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_ref: Option<String>,
    pub spec: ResourceSpec,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    #[serde(default)]
    pub status: RecordStatus,
    /// Set when the user removed the record; the delete phase must run
    /// before the record is erased.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_requested: Option<DateTime<Utc>>,
    /// Bumped by the store on every spec change.
    #[serde(default)]
    pub generation: u64,
}

impl ResourceRecord {
    /// Create a fresh record with empty metadata and status.
    pub fn new(id: ResourceId, spec: ResourceSpec) -> Self {
        Self {
            id,
            credentials_ref: None,
            spec,
            metadata: Metadata::new(),
            status: RecordStatus::default(),
            deletion_requested: None,
            generation: 1,
        }
    }

    /// Use a named connection profile.
    #[must_use]
    pub fn with_credentials_ref(mut self, profile: impl Into<String>) -> Self {
        self.credentials_ref = Some(profile.into());
        self
    }

    pub const fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    /// Name of the remote resource this record targets.
    ///
    /// Falls back to the record name when the spec does not set one.
    pub fn target_name(&self) -> &str {
        self.spec.explicit_name().unwrap_or(&self.id.name)
    }

    pub const fn is_deleting(&self) -> bool {
        self.deletion_requested.is_some()
    }

    /// Check the structural rules every kind imposes on its spec.
    pub fn validate(&self) -> Result<()> {
        let id = self.id.to_string();
        if self.id.name.trim().is_empty() {
            return Err(Error::missing_field(id, "name"));
        }
        if self.target_name().trim().is_empty() {
            return Err(Error::invalid_record(id, "remote name must not be empty"));
        }
        match &self.spec {
            ResourceSpec::Policy(spec) => {
                let allow = spec.allow_bucket.as_deref().is_some_and(|b| !b.is_empty());
                let raw = spec.raw_policy.as_deref().is_some_and(|p| !p.is_empty());
                if allow == raw {
                    return Err(Error::exclusive_fields(id, "allowBucket, rawPolicy"));
                }
            }
            ResourceSpec::ServiceAccount(spec) if spec.parent_user.trim().is_empty() => {
                return Err(Error::missing_field(id, "parentUser"));
            }
            _ => {}
        }
        Ok(())
    }
}
