//! Desired configuration blocks, one per resource kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Region used when a bucket does not name one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// How a bucket is removed when its record is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeletionPolicy {
    /// Remove the bucket only if it holds no objects.
    #[default]
    DeleteIfEmpty,
    /// Remove every object first, then the bucket.
    DeleteAll,
}

/// Desired state of a bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSpec {
    /// Remote bucket name. Defaults to the record name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,
    /// Region the bucket is created in. Defaults to [`DEFAULT_REGION`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Deletion behaviour.
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
    /// Raw bucket access policy (JSON).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
}

impl BucketSpec {
    /// Region to create the bucket in.
    pub fn region(&self) -> &str {
        self.region.as_deref().unwrap_or(DEFAULT_REGION)
    }
}

/// Desired state of a user identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    /// Remote user name. Defaults to the record name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Canned policies the user should carry.
    #[serde(default)]
    pub policies: Vec<String>,
}

/// Desired state of a canned access policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    /// Remote policy name. Defaults to the record name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<String>,
    /// Generate a policy that allows everything on this bucket.
    /// Mutually exclusive with `raw_policy`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_bucket: Option<String>,
    /// Policy document verbatim. Mutually exclusive with `allow_bucket`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_policy: Option<String>,
}

/// Desired state of a service account (access key pair under a parent user).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountSpec {
    /// User the service account belongs to.
    pub parent_user: String,
    /// Display name. Defaults to the record name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    /// Session policy narrowing the parent's permissions (JSON).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
}

/// Kind-specific desired configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceSpec {
    Bucket(BucketSpec),
    User(UserSpec),
    Policy(PolicySpec),
    ServiceAccount(ServiceAccountSpec),
}

impl ResourceSpec {
    /// The kind this spec describes.
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Bucket(_) => ResourceKind::Bucket,
            Self::User(_) => ResourceKind::User,
            Self::Policy(_) => ResourceKind::Policy,
            Self::ServiceAccount(_) => ResourceKind::ServiceAccount,
        }
    }

    /// Explicitly configured remote name, if any.
    pub fn explicit_name(&self) -> Option<&str> {
        match self {
            Self::Bucket(spec) => spec.bucket_name.as_deref(),
            Self::User(spec) => spec.user_name.as_deref(),
            Self::Policy(spec) => spec.policy_name.as_deref(),
            Self::ServiceAccount(spec) => spec.name.as_deref(),
        }
    }
}

/// Resource kinds the engine knows how to reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Bucket,
    User,
    Policy,
    ServiceAccount,
}

impl ResourceKind {
    /// All kinds, in registration order.
    pub const ALL: [Self; 4] = [Self::Bucket, Self::User, Self::Policy, Self::ServiceAccount];

    /// Stable lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bucket => "bucket",
            Self::User => "user",
            Self::Policy => "policy",
            Self::ServiceAccount => "serviceaccount",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
