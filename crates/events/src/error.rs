//! Error types for the events crate.

use std::fmt;

/// Result type alias for record store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Record store error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The record does not exist (anymore).
    RecordNotFound { id: String },
    /// Store operation failed.
    StoreFailed { operation: String, reason: String },
    /// The store dropped its notification channel.
    ChannelClosed,
    /// The subscriber fell behind and missed notifications.
    Lagged { skipped: u64 },
    /// The record was rejected by validation.
    InvalidRecord(silo_core::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecordNotFound { id } => {
                write!(f, "record '{id}' not found")
            }
            Self::StoreFailed { operation, reason } => {
                write!(f, "record store operation '{operation}' failed: {reason}")
            }
            Self::ChannelClosed => {
                write!(f, "record watch channel closed")
            }
            Self::Lagged { skipped } => {
                write!(f, "record watch lagged, {skipped} notifications skipped")
            }
            Self::InvalidRecord(err) => {
                write!(f, "{err}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidRecord(err) => Some(err),
            _ => None,
        }
    }
}

impl From<silo_core::Error> for Error {
    fn from(err: silo_core::Error) -> Self {
        Self::InvalidRecord(err)
    }
}

impl Error {
    /// Create a record not found error.
    pub fn record_not_found(id: impl fmt::Display) -> Self {
        Self::RecordNotFound { id: id.to_string() }
    }

    /// Create a store failed error.
    pub fn store_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StoreFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error means the record is gone.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::RecordNotFound { .. })
    }
}
