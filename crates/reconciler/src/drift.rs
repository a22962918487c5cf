//! Drift detection: does the remote resource exist, do we own it, and does
//! it match the desired spec?

use std::fmt;

use itertools::Itertools;
use serde_json::Value;

use silo_core::{AtProvider, ResourceRecord, lock};

use crate::error::{ReconcileError, Result};
use crate::external::ExternalClient;

/// A field that can drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// A policy document.
    Policy,
    /// A set of attached policy names.
    Policies,
    ParentUser,
    Description,
    Expiry,
}

impl Field {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Policy => "policy",
            Self::Policies => "policies",
            Self::ParentUser => "parentUser",
            Self::Description => "description",
            Self::Expiry => "expiry",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One mismatch between desired and observed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drift {
    pub field: Field,
    pub detail: String,
}

impl Drift {
    pub fn new(field: Field, detail: impl Into<String>) -> Self {
        Self {
            field,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.detail)
    }
}

/// What observe found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    pub exists: bool,
    /// The record carries the adoption lock.
    pub owned: bool,
    pub drift: Vec<Drift>,
    pub observed: AtProvider,
}

impl Observation {
    /// The remote resource does not exist.
    pub fn absent() -> Self {
        Self::default()
    }

    /// The resource exists and this record started creating it, but the
    /// lock was never committed.
    pub fn interrupted_create(observed: AtProvider) -> Self {
        Self {
            exists: true,
            owned: false,
            drift: Vec::new(),
            observed,
        }
    }

    /// The resource exists and is owned by this record.
    pub const fn owned(observed: AtProvider, drift: Vec<Drift>) -> Self {
        Self {
            exists: true,
            owned: true,
            drift,
            observed,
        }
    }

    pub fn up_to_date(&self) -> bool {
        self.exists && self.owned && self.drift.is_empty()
    }
}

/// Observe the remote resource for `record`.
///
/// A resource that exists without this record's lock is a name collision,
/// unless the record marked a create as pending, in which case the create is
/// resumed.
pub async fn observe(client: &dyn ExternalClient, record: &ResourceRecord) -> Result<Observation> {
    let Some(observed) = client.probe(record).await? else {
        return Ok(Observation::absent());
    };

    if !lock::is_claimed(&record.metadata) {
        if lock::is_create_pending(&record.metadata) {
            tracing::info!(
                resource = %record.id,
                "Remote resource exists from an interrupted create, resuming"
            );
            return Ok(Observation::interrupted_create(observed));
        }
        return Err(ReconcileError::name_collision(
            record.kind().as_str(),
            record.target_name(),
        ));
    }

    let drift = client.diff(record, &observed)?;
    Ok(Observation::owned(observed, drift))
}

/// Compare two JSON documents structurally.
///
/// Object key order and whitespace are ignored; array order is significant.
/// Fails when either side is not valid JSON.
pub fn same_object(a: &str, b: &str) -> Result<bool> {
    let left = parse_document(a, "desired")?;
    let right = parse_document(b, "observed")?;
    Ok(left == right)
}

fn parse_document(document: &str, side: &str) -> Result<Value> {
    serde_json::from_str(document)
        .map_err(|e| ReconcileError::malformed_policy(format!("{side} document: {e}")))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Diff two optional policy documents. An empty document counts as absent.
pub fn diff_policy(field: Field, desired: Option<&str>, observed: Option<&str>) -> Result<Option<Drift>> {
    match (non_empty(desired), non_empty(observed)) {
        (None, None) => Ok(None),
        (Some(_), None) => Ok(Some(Drift::new(field, "missing remotely"))),
        (None, Some(_)) => Ok(Some(Drift::new(field, "set remotely but not desired"))),
        (Some(want), Some(have)) => Ok((!same_object(want, have)?)
            .then(|| Drift::new(field, "document differs"))),
    }
}

/// Diff two name sets, ignoring order and duplicates.
pub fn diff_sets(field: Field, desired: &[String], observed: &[String]) -> Option<Drift> {
    let want: Vec<&String> = desired.iter().sorted().dedup().collect();
    let have: Vec<&String> = observed.iter().sorted().dedup().collect();
    if want == have {
        return None;
    }
    let missing = want.iter().filter(|name| !have.contains(*name)).join(",");
    let extra = have.iter().filter(|name| !want.contains(*name)).join(",");
    Some(Drift::new(field, format!("missing [{missing}], extra [{extra}]")))
}

/// Diff a single value. A value that is not desired is not compared.
pub fn diff_value<T: PartialEq + fmt::Debug>(
    field: Field,
    desired: Option<&T>,
    observed: Option<&T>,
) -> Option<Drift> {
    match desired {
        Some(want) if observed != Some(want) => Some(Drift::new(
            field,
            format!("want {want:?}, have {observed:?}"),
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_object_ignores_formatting_and_key_order() {
        let a = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Action":["s3:*"]}]}"#;
        let b = r#"{
            "Statement": [ { "Action": ["s3:*"], "Effect": "Allow" } ],
            "Version": "2012-10-17"
        }"#;
        assert!(same_object(a, b).is_ok_and(|same| same));
    }

    #[test]
    fn test_same_object_array_order_matters() {
        let result = same_object(r#"{"a":[1,2]}"#, r#"{"a":[2,1]}"#);
        assert!(result.is_ok_and(|same| !same));
    }

    #[test]
    fn test_same_object_malformed_is_error() {
        let result = same_object("{", "{}");
        assert!(matches!(result, Err(ReconcileError::MalformedPolicy { .. })));
        let result = same_object("{}", "not json");
        assert!(matches!(result, Err(ReconcileError::MalformedPolicy { .. })));
    }

    #[test]
    fn test_diff_policy_treats_empty_as_absent() {
        assert!(matches!(diff_policy(Field::Policy, Some(""), None), Ok(None)));
        assert!(matches!(
            diff_policy(Field::Policy, None, Some("{}")),
            Ok(Some(_))
        ));
        assert!(matches!(
            diff_policy(Field::Policy, Some("{}"), Some(" {} ")),
            Ok(None)
        ));
    }

    #[test]
    fn test_diff_sets_ignores_order() {
        let a = vec!["readwrite".to_string(), "diagnostics".to_string()];
        let b = vec!["diagnostics".to_string(), "readwrite".to_string()];
        assert_eq!(diff_sets(Field::Policies, &a, &b), None);

        let c = vec!["readonly".to_string()];
        let drift = diff_sets(Field::Policies, &a, &c);
        assert!(drift.is_some_and(|d| d.detail.contains("extra [readonly]")));
    }

    #[test]
    fn test_diff_value_skips_undesired() {
        assert_eq!(diff_value::<String>(Field::Description, None, Some(&"x".into())), None);
        assert!(diff_value(Field::Description, Some(&"a"), Some(&"b")).is_some());
    }

    #[test]
    fn test_up_to_date_requires_ownership() {
        assert!(!Observation::absent().up_to_date());
        assert!(!Observation::interrupted_create(AtProvider::default()).up_to_date());
        assert!(Observation::owned(AtProvider::default(), Vec::new()).up_to_date());
    }
}
