//! Observed status and human-readable conditions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fields observed on the remote side during the last pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtProvider {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    /// Policy document as currently applied remotely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    /// Canned policies attached to an identity.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<String>,
    /// Remote account status ("enabled", "disabled").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionKind {
    /// Whether the remote resource is usable.
    Ready,
    /// Whether the last pass succeeded.
    Synced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reason {
    Available,
    Creating,
    Deleting,
    Unavailable,
    ReconcileSuccess,
    ReconcileError,
}

/// A single status condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub kind: ConditionKind,
    pub status: bool,
    pub reason: Reason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_transition: DateTime<Utc>,
}

impl Condition {
    fn new(kind: ConditionKind, status: bool, reason: Reason, message: Option<String>) -> Self {
        Self {
            kind,
            status,
            reason,
            message,
            last_transition: Utc::now(),
        }
    }

    pub fn available() -> Self {
        Self::new(ConditionKind::Ready, true, Reason::Available, None)
    }

    pub fn creating() -> Self {
        Self::new(ConditionKind::Ready, false, Reason::Creating, None)
    }

    pub fn deleting() -> Self {
        Self::new(ConditionKind::Ready, false, Reason::Deleting, None)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            ConditionKind::Ready,
            false,
            Reason::Unavailable,
            Some(message.into()),
        )
    }

    pub fn reconcile_success() -> Self {
        Self::new(ConditionKind::Synced, true, Reason::ReconcileSuccess, None)
    }

    pub fn reconcile_error(message: impl Into<String>) -> Self {
        Self::new(
            ConditionKind::Synced,
            false,
            Reason::ReconcileError,
            Some(message.into()),
        )
    }

    /// Same state, ignoring the transition timestamp.
    fn same_state(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Observed status block of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordStatus {
    #[serde(default)]
    pub at_provider: AtProvider,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<DateTime<Utc>>,
    /// Generation of the spec the last successful pass acted on.
    #[serde(default)]
    pub observed_generation: u64,
}

impl RecordStatus {
    /// Set a condition, replacing the one of the same kind.
    ///
    /// The transition timestamp is kept when nothing but the timestamp changed.
    pub fn set_condition(&mut self, condition: Condition) {
        match self.conditions.iter_mut().find(|c| c.kind == condition.kind) {
            Some(existing) if existing.same_state(&condition) => {}
            Some(existing) => *existing = condition,
            None => self.conditions.push(condition),
        }
    }

    pub fn condition(&self, kind: ConditionKind) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.kind == kind)
    }

    pub fn is_ready(&self) -> bool {
        self.condition(ConditionKind::Ready).is_some_and(|c| c.status)
    }

    pub fn is_synced(&self) -> bool {
        self.condition(ConditionKind::Synced).is_some_and(|c| c.status)
    }

    /// Message of the failing Synced condition, if any.
    pub fn sync_error(&self) -> Option<&str> {
        self.condition(ConditionKind::Synced)
            .filter(|c| !c.status)
            .and_then(|c| c.message.as_deref())
    }
}
