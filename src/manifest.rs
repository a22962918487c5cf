//! YAML manifests of declared resources.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use thiserror::Error;

use silo_core::ResourceRecord;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse manifest: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("resource {id} is declared more than once")]
    Duplicate { id: String },

    #[error("resource {id} is invalid: {source}")]
    Invalid {
        id: String,
        #[source]
        source: silo_core::Error,
    },
}

/// Read and check a manifest file.
pub fn load(path: &Path) -> Result<Vec<ResourceRecord>, ManifestError> {
    let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text)
}

/// Parse a YAML sequence of records.
///
/// Ids must be unique and every record must pass validation. Metadata and
/// status in the manifest are ignored.
pub fn parse(text: &str) -> Result<Vec<ResourceRecord>, ManifestError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let declared: Vec<ResourceRecord> = serde_yaml::from_str(text)?;
    let mut seen = BTreeSet::new();
    declared
        .into_iter()
        .map(|record| {
            if !seen.insert(record.id.clone()) {
                return Err(ManifestError::Duplicate {
                    id: record.id.to_string(),
                });
            }
            record.validate().map_err(|source| ManifestError::Invalid {
                id: record.id.to_string(),
                source,
            })?;
            Ok(ResourceRecord {
                credentials_ref: record.credentials_ref,
                ..ResourceRecord::new(record.id, record.spec)
            })
        })
        .collect()
}
