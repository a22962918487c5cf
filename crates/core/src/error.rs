//! Core error types for silo records.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for record handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The record violates a structural rule of its kind.
    #[error("invalid record '{id}': {reason}")]
    InvalidRecord { id: String, reason: String },

    /// A required field is missing or empty.
    #[error("record '{id}' is missing required field '{field}'")]
    MissingField { id: String, field: &'static str },

    /// Two mutually exclusive fields were both set (or neither was).
    #[error("record '{id}': exactly one of {fields} must be set")]
    ExclusiveFields { id: String, fields: &'static str },
}

impl Error {
    /// Create an invalid record error.
    pub fn invalid_record(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a missing field error.
    pub fn missing_field(id: impl Into<String>, field: &'static str) -> Self {
        Self::MissingField {
            id: id.into(),
            field,
        }
    }

    /// Create an exclusive fields error.
    pub fn exclusive_fields(id: impl Into<String>, fields: &'static str) -> Self {
        Self::ExclusiveFields {
            id: id.into(),
            fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_record("team-a/bucket", "name too long");
        assert!(err.to_string().contains("team-a/bucket"));
        assert!(err.to_string().contains("name too long"));
    }

    #[test]
    fn test_exclusive_fields_names_both() {
        let err = Error::exclusive_fields("p", "allowBucket, rawPolicy");
        assert!(err.to_string().contains("allowBucket, rawPolicy"));
    }
}
