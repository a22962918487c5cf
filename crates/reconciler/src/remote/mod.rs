//! Capability interfaces to the remote storage control plane.
//!
//! Each remote concern gets a small trait so the engine never depends on a
//! concrete SDK. [`memory::InMemoryControlPlane`] implements all of them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod memory;

/// Classified failure of a single remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("access denied: {message}")]
    Forbidden { message: String },

    #[error("resource lives in region '{region}'")]
    WrongRegion { region: String },

    #[error("{resource} already exists")]
    AlreadyExists { resource: String },

    #[error("service unavailable: {message}")]
    Unavailable { message: String },

    #[error("{message}")]
    Rejected { message: String },
}

impl RemoteError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn already_exists(resource: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource: resource.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// An object stored in a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    pub size: u64,
}

impl ObjectInfo {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version_id: None,
            size: 0,
        }
    }
}

/// Flags for a bulk removal request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Remove objects protected by governance-mode retention.
    pub governance_bypass: bool,
}

/// An object a bulk removal request could not remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveFailure {
    pub key: String,
    pub error: RemoteError,
}

/// Identity as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub policies: Vec<String>,
    /// "enabled" or "disabled".
    pub status: String,
}

/// Service account as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccountInfo {
    pub parent_user: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
    pub policy: Option<String>,
    pub status: String,
}

/// Request to create a service account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewServiceAccount {
    pub parent_user: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
    pub policy: Option<String>,
}

/// Fields to overwrite on an existing service account. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceAccountUpdate {
    pub description: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
    pub policy: Option<String>,
}

impl ServiceAccountUpdate {
    pub const fn is_empty(&self) -> bool {
        self.description.is_none() && self.expiry.is_none() && self.policy.is_none()
    }
}

/// Access key pair assigned by the control plane.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Bucket existence, lifecycle and configuration.
#[async_trait]
pub trait BucketApi: Send + Sync {
    /// Check whether a bucket exists. Access and region problems are errors,
    /// never `false`.
    async fn bucket_exists(&self, bucket: &str) -> RemoteResult<bool>;

    async fn make_bucket(&self, bucket: &str, region: &str) -> RemoteResult<()>;

    async fn remove_bucket(&self, bucket: &str) -> RemoteResult<()>;

    /// Current bucket policy, `None` when no policy is set.
    async fn bucket_policy(&self, bucket: &str) -> RemoteResult<Option<String>>;

    /// Set the bucket policy; an empty document removes it.
    async fn set_bucket_policy(&self, bucket: &str, policy: &str) -> RemoteResult<()>;

    /// Whether object lock (retention) is enabled on the bucket.
    async fn object_lock_enabled(&self, bucket: &str) -> RemoteResult<bool>;
}

/// Object listing and removal.
#[async_trait]
pub trait ObjectApi: Send + Sync {
    /// List every object in the bucket, recursively and lazily.
    ///
    /// An error item concerns a single entry; the stream continues after it.
    fn list_objects(&self, bucket: &str) -> BoxStream<'_, RemoteResult<ObjectInfo>>;

    /// Remove a batch of objects, returning the ones that could not be removed.
    async fn remove_objects(
        &self,
        bucket: &str,
        objects: Vec<ObjectInfo>,
        options: RemoveOptions,
    ) -> RemoteResult<Vec<RemoveFailure>>;
}

/// Identity management.
#[async_trait]
pub trait UserApi: Send + Sync {
    async fn user_info(&self, user: &str) -> RemoteResult<UserInfo>;

    /// Create `user`, or reset the secret of an existing one.
    async fn add_user(&self, user: &str, secret: &str) -> RemoteResult<()>;

    async fn remove_user(&self, user: &str) -> RemoteResult<()>;

    /// Replace the user's policies with exactly `policies`.
    async fn set_user_policies(&self, user: &str, policies: &[String]) -> RemoteResult<()>;

    async fn attach_user_policies(&self, user: &str, policies: &[String]) -> RemoteResult<()>;

    async fn detach_user_policies(&self, user: &str, policies: &[String]) -> RemoteResult<()>;
}

/// Canned policy management.
#[async_trait]
pub trait PolicyApi: Send + Sync {
    async fn canned_policy(&self, name: &str) -> RemoteResult<String>;

    /// Create or overwrite a canned policy.
    async fn add_canned_policy(&self, name: &str, document: &str) -> RemoteResult<()>;

    async fn remove_canned_policy(&self, name: &str) -> RemoteResult<()>;

    async fn list_canned_policies(&self) -> RemoteResult<Vec<String>>;
}

/// Service account management.
#[async_trait]
pub trait ServiceAccountApi: Send + Sync {
    async fn service_account_info(&self, access_key: &str) -> RemoteResult<ServiceAccountInfo>;

    async fn add_service_account(&self, request: NewServiceAccount) -> RemoteResult<Credentials>;

    async fn update_service_account(
        &self,
        access_key: &str,
        update: ServiceAccountUpdate,
    ) -> RemoteResult<()>;

    async fn delete_service_account(&self, access_key: &str) -> RemoteResult<()>;
}

/// Client for buckets and their contents.
pub trait DataPlane: BucketApi + ObjectApi {}

impl<T: BucketApi + ObjectApi> DataPlane for T {}

/// Client for identities, policies and service accounts.
pub trait AdminPlane: UserApi + PolicyApi + ServiceAccountApi {}

impl<T: UserApi + PolicyApi + ServiceAccountApi> AdminPlane for T {}
