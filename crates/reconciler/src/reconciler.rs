//! The reconciliation core.
//!
//! One pass runs the four phases for one record: connect, observe, then
//! create, update or delete, and finally disconnect. Every outcome is written
//! back through the record store.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use itertools::Itertools;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use ulid::Ulid;

use silo_core::{
    AtProvider, Condition, ResourceId, ResourceRecord, ResultExt, lock,
};
use silo_events::RecordStore;

use crate::drift::{self, Drift, Field, Observation};
use crate::error::{ReconcileError, Result};
use crate::external::{Creation, ExternalClient};
use crate::registry::ConnectorRegistry;

/// What a pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The remote resource was created and claimed.
    Created,
    /// Drifted fields were rewritten.
    Updated { fields: Vec<Field> },
    /// Nothing to do, status refreshed.
    UpToDate,
    /// The remote resource and the record are gone.
    Deleted,
    /// The record never owned a remote resource and was erased.
    Forgotten,
    /// The record no longer exists.
    Gone,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Updated { fields } => write!(f, "updated [{}]", fields.iter().join(",")),
            Self::UpToDate => f.write_str("up to date"),
            Self::Deleted => f.write_str("deleted"),
            Self::Forgotten => f.write_str("forgotten"),
            Self::Gone => f.write_str("gone"),
        }
    }
}

/// What a pass would do, decided without mutating anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Create,
    /// A create by this record was interrupted after the remote side
    /// accepted it.
    ResumeCreate,
    Update(Vec<Drift>),
    NoOp,
    Delete,
    Forget,
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::ResumeCreate => f.write_str("resume create"),
            Self::Update(drift) => write!(f, "update ({})", drift.iter().join("; ")),
            Self::NoOp => f.write_str("no-op"),
            Self::Delete => f.write_str("delete"),
            Self::Forget => f.write_str("forget"),
        }
    }
}

/// Drives records toward their desired state.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn RecordStore>,
    registry: Arc<ConnectorRegistry>,
}

/// Whether a record may touch a remote resource when deleting.
///
/// Only a claim counts. A pending create may have lost the name to another
/// record, so deleting would remove a resource someone else owns.
fn owns_remote(record: &ResourceRecord) -> bool {
    lock::is_claimed(&record.metadata)
}

impl Reconciler {
    pub fn new(store: Arc<dyn RecordStore>, registry: Arc<ConnectorRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Run one pass for `id`.
    ///
    /// When `cancel` fires, in-flight remote calls are abandoned and the pass
    /// returns [`ReconcileError::Cancelled`]. The next pass starts over from
    /// connect.
    pub async fn reconcile(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<Outcome> {
        let span = info_span!(
            "reconcile",
            resource = %id,
            pass = %Ulid::new(),
            kind = tracing::field::Empty,
        );
        async {
            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(ReconcileError::Cancelled),
                outcome = self.pass(id, cancel) => outcome,
            }
        }
        .instrument(span)
        .await
    }

    async fn pass(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<Outcome> {
        let Some(mut record) = self.store.get(id).await? else {
            debug!("Record no longer exists");
            return Ok(Outcome::Gone);
        };
        tracing::Span::current().record("kind", record.kind().as_str());

        let result = self.run_phases(&mut record, cancel).await;
        match &result {
            Ok(outcome) => debug!(%outcome, "Pass finished"),
            Err(e) => {
                warn!(error = %e, reason = e.reason(), retryable = e.is_retryable(), "Pass failed");
                self.report_error(&record, e).await;
            }
        }
        result
    }

    async fn run_phases(
        &self,
        record: &mut ResourceRecord,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        record.validate()?;

        if record.is_deleting() && !owns_remote(record) {
            if lock::is_create_pending(&record.metadata) {
                warn!("Unconfirmed create on a deleted record, remote side left in place");
            }
            info!("Record never owned a remote resource, erasing it");
            self.store.delete(&record.id).await?;
            return Ok(Outcome::Forgotten);
        }

        let connector = self.registry.get(record.kind())?;
        let client = connector.connect(record).await?;
        let result = self.drive(client.as_ref(), record, cancel).await;
        client.disconnect().await;
        result
    }

    async fn drive(
        &self,
        client: &dyn ExternalClient,
        record: &mut ResourceRecord,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        if record.is_deleting() {
            return self.delete(client, record, cancel).await;
        }

        let observation = drift::observe(client, record).await?;
        if !observation.exists {
            return self.create(client, record).await;
        }
        if !observation.owned {
            return self.resume(client, record).await;
        }
        if observation.up_to_date() {
            self.report_success(record, Some(observation.observed)).await?;
            return Ok(Outcome::UpToDate);
        }
        self.update(client, record, observation).await
    }

    async fn create(
        &self,
        client: &dyn ExternalClient,
        record: &mut ResourceRecord,
    ) -> Result<Outcome> {
        let resumable = lock::is_create_pending(&record.metadata);
        if !resumable {
            lock::mark_create_pending(&mut record.metadata);
            self.store
                .put_metadata(&record.id, record.metadata.clone())
                .await?;
        }

        let creation = match client.create(record).await {
            Ok(creation) => creation,
            Err(e) if e.is_already_exists() && resumable => {
                if client.probe(record).await?.is_none() {
                    return Err(e);
                }
                info!("Remote resource already exists from an earlier create");
                return self.resume(client, record).await;
            }
            Err(e) if e.is_already_exists() => {
                // Absent when observed, so another writer took the name.
                self.release_pending(record).await?;
                return Err(ReconcileError::name_collision(
                    record.kind().as_str(),
                    record.target_name(),
                ));
            }
            Err(e) => {
                self.abandon_create(client, record).await;
                return Err(e);
            }
        };
        self.commit(client, record, creation).await
    }

    /// Finish a create whose remote call went through before the claim.
    async fn resume(
        &self,
        client: &dyn ExternalClient,
        record: &mut ResourceRecord,
    ) -> Result<Outcome> {
        if let Some(owner) = self.claimed_elsewhere(record).await? {
            warn!(%owner, "Name was claimed by another record after an interrupted create");
            self.release_pending(record).await?;
            return Err(ReconcileError::name_collision(
                record.kind().as_str(),
                record.target_name(),
            ));
        }
        info!("Resuming interrupted create");
        let creation = client.resume_create(record).await?;
        self.commit(client, record, creation).await
    }

    /// Claim the remote resource and publish what the create produced.
    async fn commit(
        &self,
        client: &dyn ExternalClient,
        record: &mut ResourceRecord,
        creation: Creation,
    ) -> Result<Outcome> {
        if let Some(name) = creation.external_name {
            lock::set_external_name(&mut record.metadata, name);
        }
        lock::claim(&mut record.metadata);
        self.store
            .put_metadata(&record.id, record.metadata.clone())
            .await?;
        info!("Remote resource created and claimed");

        if !creation.connection_details.is_empty() {
            self.store
                .publish_connection_details(&record.id, creation.connection_details)
                .await?;
        }

        let observed = client
            .probe(record)
            .await
            .into_option_logged("Cannot observe freshly created resource")
            .flatten();
        self.report_success(record, observed).await?;
        Ok(Outcome::Created)
    }

    /// Drop the pending marker after a failed create, when the remote side
    /// confirms nothing exists. An unanswered lookup keeps the marker.
    async fn abandon_create(&self, client: &dyn ExternalClient, record: &mut ResourceRecord) {
        match client.probe(record).await {
            Ok(None) => {
                self.release_pending(record)
                    .await
                    .into_option_logged("Cannot clear create-pending marker");
            }
            Ok(Some(_)) => debug!("Failed create left a remote resource behind"),
            Err(e) => debug!(error = %e, "Cannot tell whether the failed create left anything"),
        }
    }

    async fn release_pending(&self, record: &mut ResourceRecord) -> Result<()> {
        lock::clear_create_pending(&mut record.metadata);
        self.store
            .put_metadata(&record.id, record.metadata.clone())
            .await?;
        Ok(())
    }

    /// Another record of the same kind holding a claim on the same remote name.
    async fn claimed_elsewhere(&self, record: &ResourceRecord) -> Result<Option<ResourceId>> {
        let records = self.store.list().await?;
        Ok(records
            .into_iter()
            .find(|other| {
                other.id != record.id
                    && other.kind() == record.kind()
                    && other.target_name() == record.target_name()
                    && lock::is_claimed(&other.metadata)
            })
            .map(|other| other.id))
    }

    async fn update(
        &self,
        client: &dyn ExternalClient,
        record: &ResourceRecord,
        observation: Observation,
    ) -> Result<Outcome> {
        let fields: Vec<Field> = observation.drift.iter().map(|d| d.field).unique().collect();
        info!(fields = %fields.iter().join(","), "Updating drifted fields");
        client.update(record, &observation.drift).await?;

        let observed = client
            .probe(record)
            .await
            .into_option_logged("Cannot observe updated resource")
            .flatten()
            .or(Some(observation.observed));
        self.report_success(record, observed).await?;
        Ok(Outcome::Updated { fields })
    }

    async fn delete(
        &self,
        client: &dyn ExternalClient,
        record: &ResourceRecord,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let mut status = record.status.clone();
        status.set_condition(Condition::deleting());
        self.store
            .put_status(&record.id, status)
            .await
            .into_option_logged("Cannot record deleting condition");

        match client.delete(record, cancel).await {
            Ok(()) => info!("Remote resource deleted"),
            Err(e) if e.is_not_found() => debug!("Remote resource already gone"),
            Err(e) => return Err(e),
        }

        self.store.delete(&record.id).await?;
        Ok(Outcome::Deleted)
    }

    async fn report_success(
        &self,
        record: &ResourceRecord,
        observed: Option<AtProvider>,
    ) -> Result<()> {
        let mut status = record.status.clone();
        match observed {
            Some(observed) => {
                status.at_provider = observed;
                status.set_condition(Condition::available());
            }
            None => status.set_condition(Condition::creating()),
        }
        status.set_condition(Condition::reconcile_success());
        status.observed_generation = record.generation;
        status.last_reconciled = Some(Utc::now());
        self.store.put_status(&record.id, status).await?;
        Ok(())
    }

    /// Write a failed pass into the record's status.
    ///
    /// Connect failures and abandoned passes leave status untouched.
    async fn report_error(&self, record: &ResourceRecord, error: &ReconcileError) {
        if matches!(
            error,
            ReconcileError::Connect(_) | ReconcileError::Cancelled | ReconcileError::Store(_)
        ) {
            return;
        }
        let mut status = record.status.clone();
        status.set_condition(Condition::reconcile_error(error.to_string()));
        if matches!(error, ReconcileError::NameCollision { .. }) {
            status.set_condition(Condition::unavailable(error.to_string()));
        }
        status.last_reconciled = Some(Utc::now());
        self.store
            .put_status(&record.id, status)
            .await
            .into_option_logged("Cannot record reconcile error");
    }

    /// Decide what a pass for `id` would do. Nothing is mutated.
    pub async fn plan(&self, id: &ResourceId) -> Result<Plan> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| silo_events::Error::record_not_found(id))?;
        record.validate()?;

        if record.is_deleting() {
            return Ok(if owns_remote(&record) {
                Plan::Delete
            } else {
                Plan::Forget
            });
        }

        let connector = self.registry.get(record.kind())?;
        let client = connector.connect(&record).await?;
        let observation = drift::observe(client.as_ref(), &record).await;
        client.disconnect().await;

        let observation = observation?;
        if observation.exists
            && !observation.owned
            && self.claimed_elsewhere(&record).await?.is_some()
        {
            return Err(ReconcileError::name_collision(
                record.kind().as_str(),
                record.target_name(),
            ));
        }
        Ok(if !observation.exists {
            Plan::Create
        } else if !observation.owned {
            Plan::ResumeCreate
        } else if observation.up_to_date() {
            Plan::NoOp
        } else {
            Plan::Update(observation.drift)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Gateway, MemoryClientFactory, Profile, ProfileResolver};
    use crate::kinds::{KindSettings, register_all};
    use crate::remote::RemoteError;
    use crate::remote::memory::InMemoryControlPlane;
    use silo_core::{BucketSpec, ConditionKind, Reason, ResourceSpec};
    use silo_events::InMemoryRecordStore;

    struct Harness {
        store: Arc<InMemoryRecordStore>,
        plane: Arc<InMemoryControlPlane>,
        reconciler: Reconciler,
    }

    fn harness() -> Harness {
        let store = InMemoryRecordStore::new_arc();
        let plane = InMemoryControlPlane::new_arc();
        let gateway = Arc::new(Gateway::new(
            Arc::new(ProfileResolver::single(Profile::new(
                "http://localhost:9000",
                "minio",
                "minio123",
            ))),
            Arc::new(MemoryClientFactory::new(plane.clone())),
        ));
        let registry =
            register_all(ConnectorRegistry::builder(), &gateway, KindSettings::default()).build();
        let reconciler = Reconciler::new(store.clone(), Arc::new(registry));
        Harness {
            store,
            plane,
            reconciler,
        }
    }

    fn bucket(name: &str) -> ResourceRecord {
        ResourceRecord::new(
            ResourceId::new(name),
            ResourceSpec::Bucket(BucketSpec::default()),
        )
    }

    async fn stored(h: &Harness, id: &ResourceId) -> Option<ResourceRecord> {
        h.store.get(id).await.ok().flatten()
    }

    #[tokio::test]
    async fn test_create_claims_and_reports_ready() {
        let h = harness();
        let record = bucket("logs");
        let _ = h.store.apply(record.clone()).await;

        let outcome = h.reconciler.reconcile(&record.id, &CancellationToken::new()).await;
        assert_eq!(outcome.ok(), Some(Outcome::Created));
        assert!(h.plane.has_bucket("logs"));

        let stored = stored(&h, &record.id).await;
        assert!(stored.as_ref().is_some_and(|r| lock::is_claimed(&r.metadata)));
        assert!(stored.as_ref().is_some_and(|r| !lock::is_create_pending(&r.metadata)));
        assert!(stored.as_ref().is_some_and(|r| r.status.is_ready() && r.status.is_synced()));
        assert_eq!(stored.map(|r| r.status.observed_generation), Some(1));
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_status_alone() {
        let store = InMemoryRecordStore::new_arc();
        let gateway = Arc::new(Gateway::new(
            Arc::new(ProfileResolver::default()),
            Arc::new(MemoryClientFactory::new(InMemoryControlPlane::new_arc())),
        ));
        let registry =
            register_all(ConnectorRegistry::builder(), &gateway, KindSettings::default()).build();
        let reconciler = Reconciler::new(store.clone(), Arc::new(registry));
        let record = bucket("logs");
        let _ = store.apply(record.clone()).await;

        let result = reconciler.reconcile(&record.id, &CancellationToken::new()).await;
        assert!(matches!(result, Err(ReconcileError::Connect(_))));
        assert!(result.is_err_and(|e| e.is_retryable()));

        let status = store.get(&record.id).await.ok().flatten().map(|r| r.status);
        assert!(status.is_some_and(|s| s.conditions.is_empty()));
    }

    #[tokio::test]
    async fn test_permission_denied_is_reported() {
        let h = harness();
        h.plane.deny_access("logs");
        let record = bucket("logs");
        let _ = h.store.apply(record.clone()).await;

        let result = h.reconciler.reconcile(&record.id, &CancellationToken::new()).await;
        assert!(matches!(result, Err(ReconcileError::PermissionDenied { .. })));

        let stored = stored(&h, &record.id).await;
        let synced = stored
            .as_ref()
            .and_then(|r| r.status.condition(ConditionKind::Synced))
            .map(|c| c.reason);
        assert_eq!(synced, Some(Reason::ReconcileError));
    }

    #[tokio::test]
    async fn test_region_mismatch_is_distinct() {
        let h = harness();
        h.plane.redirect("logs", "eu-west-1");
        let record = bucket("logs");
        let _ = h.store.apply(record.clone()).await;

        let result = h.reconciler.reconcile(&record.id, &CancellationToken::new()).await;
        assert!(matches!(result, Err(ReconcileError::RegionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_unowned_deletion_skips_remote() {
        let h = harness();
        h.plane.insert_bucket("shared");
        let record = bucket("shared");
        let _ = h.store.apply(record.clone()).await;
        let _ = h.store.request_deletion(&record.id).await;

        let outcome = h.reconciler.reconcile(&record.id, &CancellationToken::new()).await;
        assert_eq!(outcome.ok(), Some(Outcome::Forgotten));
        assert!(h.plane.has_bucket("shared"));
        assert!(stored(&h, &record.id).await.is_none());
    }

    #[tokio::test]
    async fn test_delete_of_vanished_resource_succeeds() {
        let h = harness();
        let mut record = bucket("logs");
        lock::claim(&mut record.metadata);
        let _ = h.store.apply(record.clone()).await;
        let _ = h.store.request_deletion(&record.id).await;

        let outcome = h.reconciler.reconcile(&record.id, &CancellationToken::new()).await;
        assert_eq!(outcome.ok(), Some(Outcome::Deleted));
        assert!(stored(&h, &record.id).await.is_none());
    }

    #[tokio::test]
    async fn test_transient_delete_keeps_record() {
        let h = harness();
        h.plane.insert_bucket("logs");
        let mut record = bucket("logs");
        lock::claim(&mut record.metadata);
        let _ = h.store.apply(record.clone()).await;
        let _ = h.store.request_deletion(&record.id).await;
        h.plane.fail_next("remove_bucket", RemoteError::unavailable("connection reset"));

        let result = h.reconciler.reconcile(&record.id, &CancellationToken::new()).await;
        assert!(result.is_err_and(|e| e.is_retryable()));
        assert!(stored(&h, &record.id).await.is_some());
        assert!(h.plane.has_bucket("logs"));

        let outcome = h.reconciler.reconcile(&record.id, &CancellationToken::new()).await;
        assert_eq!(outcome.ok(), Some(Outcome::Deleted));
        assert!(!h.plane.has_bucket("logs"));
    }

    #[tokio::test]
    async fn test_missing_record_is_gone() {
        let h = harness();
        let outcome = h
            .reconciler
            .reconcile(&ResourceId::new("nope"), &CancellationToken::new())
            .await;
        assert_eq!(outcome.ok(), Some(Outcome::Gone));
    }

    #[tokio::test]
    async fn test_cancelled_pass_mutates_nothing() {
        let h = harness();
        let record = bucket("logs");
        let _ = h.store.apply(record.clone()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = h.reconciler.reconcile(&record.id, &cancel).await;
        assert!(matches!(result, Err(ReconcileError::Cancelled)));
        assert_eq!(h.plane.mutations(), 0);
    }

    #[tokio::test]
    async fn test_plan_reports_without_mutating() {
        let h = harness();
        let record = bucket("logs");
        let _ = h.store.apply(record.clone()).await;

        let plan = h.reconciler.plan(&record.id).await;
        assert_eq!(plan.ok(), Some(Plan::Create));
        assert_eq!(h.plane.mutations(), 0);

        let _ = h.reconciler.reconcile(&record.id, &CancellationToken::new()).await;
        let plan = h.reconciler.plan(&record.id).await;
        assert_eq!(plan.ok(), Some(Plan::NoOp));
    }

    #[tokio::test]
    async fn test_pending_deletion_is_forgotten() {
        let h = harness();
        h.plane.insert_bucket("logs");
        let mut record = bucket("logs");
        lock::mark_create_pending(&mut record.metadata);
        let _ = h.store.apply(record.clone()).await;
        let _ = h.store.request_deletion(&record.id).await;

        assert_eq!(h.reconciler.plan(&record.id).await.ok(), Some(Plan::Forget));
        let outcome = h.reconciler.reconcile(&record.id, &CancellationToken::new()).await;
        assert_eq!(outcome.ok(), Some(Outcome::Forgotten));
        assert!(h.plane.has_bucket("logs"));
        assert_eq!(h.plane.mutations(), 0);
    }

    #[tokio::test]
    async fn test_plan_refuses_resume_when_name_claimed_elsewhere() {
        let h = harness();
        h.plane.insert_bucket("logs");
        let mut owner = ResourceRecord::new(
            ResourceId::new("owner"),
            ResourceSpec::Bucket(BucketSpec {
                bucket_name: Some("logs".into()),
                ..BucketSpec::default()
            }),
        );
        lock::claim(&mut owner.metadata);
        let mut pending = bucket("logs");
        lock::mark_create_pending(&mut pending.metadata);
        let _ = h.store.apply(owner).await;
        let _ = h.store.apply(pending.clone()).await;

        let plan = h.reconciler.plan(&pending.id).await;
        assert!(matches!(plan, Err(ReconcileError::NameCollision { .. })));
    }

    #[test]
    fn test_outcome_display() {
        let outcome = Outcome::Updated {
            fields: vec![Field::Policy, Field::Description],
        };
        assert_eq!(outcome.to_string(), "updated [policy,description]");
    }
}
