//! Error types for the reconciler crate.
//!
//! Every failure a pass can hit is classified as either transient (retried on
//! the next trigger with no terminal state) or terminal (surfaced to the user
//! and retried on the normal poll cadence until the desired record changes).

use std::time::Duration;

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;

/// How the engine treats an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network or availability trouble; expected to clear on its own.
    Transient,
    /// Needs a change to the desired record or the remote side.
    Terminal,
}

/// Failure to resolve connection parameters for a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no connection profile named '{profile}'")]
    UnknownProfile { profile: String },

    #[error("record has no credentials reference and no default profile is configured")]
    NoDefaultProfile,

    #[error("secret for profile '{profile}' is unavailable: {reason}")]
    SecretUnavailable { profile: String, reason: String },
}

/// Failure to build a remote client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("credentials unavailable: {reason}")]
    CredentialsUnavailable { reason: String },

    #[error("malformed endpoint '{endpoint}': {reason}")]
    MalformedEndpoint { endpoint: String, reason: String },

    #[error("cannot build TLS configuration: {reason}")]
    TlsBuild { reason: String },

    #[error("client factory cannot provide the {plane} plane")]
    PlaneUnavailable { plane: &'static str },
}

impl ConnectError {
    /// Create a credentials unavailable error.
    pub fn credentials_unavailable(reason: impl Into<String>) -> Self {
        Self::CredentialsUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a malformed endpoint error.
    pub fn malformed_endpoint(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedEndpoint {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Create a TLS build error.
    pub fn tls_build(reason: impl Into<String>) -> Self {
        Self::TlsBuild {
            reason: reason.into(),
        }
    }

    /// Stable classification string.
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::CredentialsUnavailable { .. } => "credentials-unavailable",
            Self::MalformedEndpoint { .. } => "malformed-endpoint",
            Self::TlsBuild { .. } => "tls-build-failure",
            Self::PlaneUnavailable { .. } => "plane-unavailable",
        }
    }
}

impl From<ResolveError> for ConnectError {
    fn from(err: ResolveError) -> Self {
        Self::credentials_unavailable(err.to_string())
    }
}

/// Errors produced by a reconcile pass.
#[derive(Debug, Clone, Error)]
pub enum ReconcileError {
    /// The client could not be built.
    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),

    /// Network or availability trouble during a remote call.
    #[error("{operation} failed: {reason}")]
    Transient { operation: String, reason: String },

    /// The remote side refused access; the resource may still exist.
    #[error("permission denied on '{resource}': {reason}")]
    PermissionDenied { resource: String, reason: String },

    /// The resource lives in another region than the one configured.
    #[error("'{resource}' is located in region '{region}'")]
    RegionMismatch { resource: String, region: String },

    /// A remote resource with this name exists but was not created by this record.
    #[error("{kind} '{resource}' already exists and is not owned by this record")]
    NameCollision { kind: &'static str, resource: String },

    /// A policy document could not be parsed.
    #[error("malformed policy: {reason}")]
    MalformedPolicy { reason: String },

    /// The bulk deletion pipeline stopped at the first object it could not remove.
    #[error("object {object:?} cannot be removed: {reason}")]
    PartialDeletion { object: String, reason: String },

    /// The remote create reported an existing resource.
    #[error("'{resource}' already exists")]
    AlreadyExists { resource: String },

    /// The remote resource is gone.
    #[error("'{resource}' not found")]
    NotFound { resource: String },

    /// A resource this record depends on does not exist.
    #[error("{kind} '{name}' does not exist")]
    MissingDependency { kind: &'static str, name: String },

    /// The desired change cannot be applied to an existing resource.
    #[error("field '{field}' of '{resource}' cannot be changed after creation")]
    ImmutableField { resource: String, field: &'static str },

    /// The desired record is structurally invalid.
    #[error(transparent)]
    InvalidSpec(#[from] silo_core::Error),

    /// The remote side rejected a request for another reason.
    #[error("{operation} rejected: {reason}")]
    Rejected { operation: String, reason: String },

    /// No connector is registered for the record's kind.
    #[error("no connector registered for kind '{kind}'")]
    UnsupportedKind { kind: silo_core::ResourceKind },

    /// Reading or writing the record store failed.
    #[error("record store: {0}")]
    Store(#[from] silo_events::Error),

    /// The pass was cancelled.
    #[error("reconcile pass cancelled")]
    Cancelled,

    /// The pass ran longer than allowed.
    #[error("reconcile pass timed out after {}s", .after.as_secs())]
    Timeout { after: Duration },
}

impl ReconcileError {
    /// Classify a remote failure of `operation` on `resource`.
    pub fn remote(operation: &str, resource: &str, err: RemoteError) -> Self {
        match err {
            RemoteError::NotFound { .. } => Self::NotFound {
                resource: resource.to_owned(),
            },
            RemoteError::Forbidden { message } => Self::PermissionDenied {
                resource: resource.to_owned(),
                reason: message,
            },
            RemoteError::WrongRegion { region } => Self::RegionMismatch {
                resource: resource.to_owned(),
                region,
            },
            RemoteError::AlreadyExists { .. } => Self::AlreadyExists {
                resource: resource.to_owned(),
            },
            RemoteError::Unavailable { message } => Self::Transient {
                operation: format!("{operation} '{resource}'"),
                reason: message,
            },
            RemoteError::Rejected { message } => Self::Rejected {
                operation: format!("{operation} '{resource}'"),
                reason: message,
            },
        }
    }

    /// Create a name collision error.
    pub fn name_collision(kind: &'static str, resource: impl Into<String>) -> Self {
        Self::NameCollision {
            kind,
            resource: resource.into(),
        }
    }

    /// Create a malformed policy error.
    pub fn malformed_policy(reason: impl Into<String>) -> Self {
        Self::MalformedPolicy {
            reason: reason.into(),
        }
    }

    /// Create a partial deletion error.
    pub fn partial_deletion(object: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PartialDeletion {
            object: object.into(),
            reason: reason.into(),
        }
    }

    /// Create a transient error.
    pub fn transient(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a missing dependency error.
    pub fn missing_dependency(kind: &'static str, name: impl Into<String>) -> Self {
        Self::MissingDependency {
            kind,
            name: name.into(),
        }
    }

    /// Create an immutable field error.
    pub fn immutable_field(resource: impl Into<String>, field: &'static str) -> Self {
        Self::ImmutableField {
            resource: resource.into(),
            field,
        }
    }

    /// How the engine treats this error.
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::RegionMismatch { .. }
            | Self::NameCollision { .. }
            | Self::MalformedPolicy { .. }
            | Self::MissingDependency { .. }
            | Self::ImmutableField { .. }
            | Self::InvalidSpec(_)
            | Self::UnsupportedKind { .. } => ErrorClass::Terminal,
            Self::Connect(_)
            | Self::Transient { .. }
            | Self::PermissionDenied { .. }
            | Self::PartialDeletion { .. }
            | Self::AlreadyExists { .. }
            | Self::NotFound { .. }
            | Self::Rejected { .. }
            | Self::Store(_)
            | Self::Cancelled
            | Self::Timeout { .. } => ErrorClass::Transient,
        }
    }

    /// Whether the error clears on its own with another pass.
    pub const fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient)
    }

    /// Stable machine-readable reason.
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Connect(err) => err.reason(),
            Self::Transient { .. } | Self::Timeout { .. } => "transient",
            Self::PermissionDenied { .. } => "permission-denied",
            Self::RegionMismatch { .. } => "region-mismatch",
            Self::NameCollision { .. } => "name-collision",
            Self::MalformedPolicy { .. } => "malformed-policy",
            Self::PartialDeletion { .. } => "partial-deletion-failure",
            Self::AlreadyExists { .. } => "already-exists",
            Self::NotFound { .. } => "not-found",
            Self::MissingDependency { .. } => "missing-dependency",
            Self::ImmutableField { .. } => "immutable-field",
            Self::InvalidSpec(_) => "invalid-spec",
            Self::Rejected { .. } => "rejected",
            Self::UnsupportedKind { .. } => "unsupported-kind",
            Self::Store(_) => "store",
            Self::Cancelled => "cancelled",
        }
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}
