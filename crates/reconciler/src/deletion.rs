//! Bulk deletion: empty a bucket, then remove it.
//!
//! A producer task lists the bucket and pushes every object into a bounded
//! queue; a consumer task drains the queue in batches and issues bulk removal
//! requests. Listing and removal overlap, and the queue applies backpressure
//! when removal falls behind. The first object that cannot be removed aborts
//! the whole pipeline: a partially emptied bucket is never reported as gone.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ReconcileError, Result};
use crate::remote::{DataPlane, ObjectInfo, RemoteError, RemoveOptions};

/// Default bounded queue size between lister and remover.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default number of objects per bulk removal request.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Tuning of the deletion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionSettings {
    pub queue_capacity: usize,
    pub batch_size: usize,
}

impl Default for DeletionSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// What a drain did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Objects handed to the remover.
    pub listed: usize,
    /// Objects confirmed removed.
    pub removed: usize,
    /// Listing entries that could not be read and were skipped.
    pub skipped: usize,
    pub governance_bypass: bool,
}

/// Empty `bucket`, then remove it.
pub async fn drain_and_delete(
    client: Arc<dyn DataPlane>,
    bucket: &str,
    settings: DeletionSettings,
    cancel: &CancellationToken,
) -> Result<DrainReport> {
    let report = drain_bucket(client.clone(), bucket, settings, cancel).await?;
    client
        .remove_bucket(bucket)
        .await
        .map_err(|e| ReconcileError::remote("remove bucket", bucket, e))?;
    info!(
        bucket,
        removed = report.removed,
        skipped = report.skipped,
        "Bucket emptied and removed"
    );
    Ok(report)
}

/// Aborts the pipeline tasks when the drain is dropped before joining them.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Remove every object in `bucket`.
///
/// Both tasks are joined before this returns, whatever the outcome. Dropping
/// the returned future aborts them.
pub async fn drain_bucket(
    client: Arc<dyn DataPlane>,
    bucket: &str,
    settings: DeletionSettings,
    cancel: &CancellationToken,
) -> Result<DrainReport> {
    let governance_bypass = governance_bypass(client.as_ref(), bucket).await;
    let options = RemoveOptions { governance_bypass };

    let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
    let producer = tokio::spawn(produce(
        client.clone(),
        bucket.to_owned(),
        tx,
        cancel.clone(),
    ));
    let consumer = tokio::spawn(consume(
        client,
        bucket.to_owned(),
        rx,
        settings.batch_size.max(1),
        options,
        cancel.clone(),
    ));

    let _guard = AbortOnDrop(vec![producer.abort_handle(), consumer.abort_handle()]);

    let (produced, consumed) = tokio::join!(producer, consumer);
    let removed = consumed.map_err(join_error)??;
    let (listed, skipped) = produced.map_err(join_error)??;

    if cancel.is_cancelled() {
        return Err(ReconcileError::Cancelled);
    }

    Ok(DrainReport {
        listed,
        removed,
        skipped,
        governance_bypass,
    })
}

/// Whether removals must bypass governance retention.
///
/// A failed lock query is not fatal: deletion proceeds without the bypass.
async fn governance_bypass(client: &dyn DataPlane, bucket: &str) -> bool {
    match client.object_lock_enabled(bucket).await {
        Ok(enabled) => enabled,
        Err(RemoteError::NotFound { .. }) => false,
        Err(e) => {
            warn!(
                bucket,
                error = %e,
                "Cannot query object lock, removing objects without governance bypass"
            );
            false
        }
    }
}

/// List the bucket into the queue. Returns (listed, skipped).
///
/// Dropping `tx` on return closes the queue, which tells the consumer to
/// finish. A closed queue means the consumer gave up, so listing stops.
async fn produce(
    client: Arc<dyn DataPlane>,
    bucket: String,
    tx: mpsc::Sender<ObjectInfo>,
    cancel: CancellationToken,
) -> Result<(usize, usize)> {
    let mut objects = client.list_objects(&bucket);
    let mut listed = 0usize;
    let mut skipped = 0usize;

    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ReconcileError::Cancelled),
            item = objects.next() => item,
        };
        let Some(item) = item else {
            break;
        };
        match item {
            Ok(object) => {
                if tx.send(object).await.is_err() {
                    debug!(bucket = %bucket, "Remover stopped, ending listing");
                    break;
                }
                listed = listed.saturating_add(1);
            }
            Err(e) => {
                warn!(bucket = %bucket, error = %e, "Skipping object that cannot be listed");
                skipped = skipped.saturating_add(1);
            }
        }
    }

    Ok((listed, skipped))
}

/// Drain the queue in batches. Returns the number of objects removed.
async fn consume(
    client: Arc<dyn DataPlane>,
    bucket: String,
    mut rx: mpsc::Receiver<ObjectInfo>,
    batch_size: usize,
    options: RemoveOptions,
    cancel: CancellationToken,
) -> Result<usize> {
    let mut removed = 0usize;
    let mut batch = Vec::with_capacity(batch_size);

    loop {
        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ReconcileError::Cancelled),
            n = rx.recv_many(&mut batch, batch_size) => n,
        };
        if received == 0 {
            return Ok(removed);
        }

        let failures = client
            .remove_objects(&bucket, std::mem::take(&mut batch), options)
            .await
            .map_err(|e| ReconcileError::remote("remove objects", &bucket, e))?;

        if let Some(failure) = failures.into_iter().next() {
            return Err(ReconcileError::partial_deletion(
                failure.key,
                failure.error.to_string(),
            ));
        }
        removed = removed.saturating_add(received);
        debug!(bucket = %bucket, removed, "Removed batch");
    }
}

fn join_error(err: JoinError) -> ReconcileError {
    if err.is_cancelled() {
        ReconcileError::Cancelled
    } else {
        ReconcileError::transient("deletion task", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::InMemoryControlPlane;

    fn plane_with(bucket: &str, keys: &[&str]) -> Arc<InMemoryControlPlane> {
        let plane = InMemoryControlPlane::new_arc();
        plane.insert_bucket(bucket);
        for key in keys {
            plane.put_object(bucket, key);
        }
        plane
    }

    #[tokio::test]
    async fn test_dropped_drain_stops_its_tasks() {
        let plane = plane_with("logs", &["a", "b", "c"]);
        let settings = DeletionSettings {
            queue_capacity: 1,
            batch_size: 1,
        };
        let cancel = CancellationToken::new();
        let mut drain = Box::pin(drain_bucket(plane.clone(), "logs", settings, &cancel));

        // Spawns both tasks, then waits on them.
        assert!(futures::poll!(&mut drain).is_pending());
        drop(drain);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(plane.objects("logs").len(), 3);
        assert!(plane.removal_batches().is_empty());
    }

    #[tokio::test]
    async fn test_empty_bucket_is_removed() {
        let plane = plane_with("empty", &[]);
        let result = drain_and_delete(
            plane.clone(),
            "empty",
            DeletionSettings::default(),
            &CancellationToken::new(),
        )
        .await;

        assert!(result.is_ok_and(|r| r.removed == 0));
        assert!(!plane.has_bucket("empty"));
    }

    #[tokio::test]
    async fn test_small_batches_remove_everything() {
        let keys: Vec<String> = (0..25).map(|i| format!("obj-{i:03}")).collect();
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let plane = plane_with("logs", &key_refs);
        let settings = DeletionSettings {
            queue_capacity: 2,
            batch_size: 10,
        };

        let report = drain_and_delete(plane.clone(), "logs", settings, &CancellationToken::new())
            .await;

        assert!(report.is_ok_and(|r| r.listed == 25 && r.removed == 25));
        assert!(!plane.has_bucket("logs"));
        assert!(plane.removal_batches().iter().all(|&n| n <= 10));
        assert_eq!(plane.removal_batches().iter().sum::<usize>(), 25);
    }

    #[tokio::test]
    async fn test_first_failure_aborts_and_keeps_bucket() {
        let plane = plane_with("logs", &["a", "b", "c"]);
        plane.fail_removal_of("b", RemoteError::unavailable("connection reset"));

        let result = drain_and_delete(
            plane.clone(),
            "logs",
            DeletionSettings::default(),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(
            &result,
            Err(ReconcileError::PartialDeletion { object, .. }) if object == "b"
        ));
        assert!(plane.has_bucket("logs"));
        assert!(plane.objects("logs").contains(&"b".to_string()));
    }

    #[tokio::test]
    async fn test_retention_sets_governance_bypass() {
        let plane = plane_with("vault", &["a", "b"]);
        plane.enable_object_lock("vault");

        let report = drain_bucket(
            plane.clone(),
            "vault",
            DeletionSettings::default(),
            &CancellationToken::new(),
        )
        .await;

        assert!(report.is_ok_and(|r| r.governance_bypass && r.removed == 2));
    }

    #[tokio::test]
    async fn test_lock_query_failure_degrades_without_bypass() {
        let plane = plane_with("logs", &["a"]);
        plane.fail_lock_query(RemoteError::rejected("not implemented"));

        let report = drain_bucket(
            plane.clone(),
            "logs",
            DeletionSettings::default(),
            &CancellationToken::new(),
        )
        .await;

        assert!(report.is_ok_and(|r| !r.governance_bypass && r.removed == 1));
    }

    #[tokio::test]
    async fn test_unlistable_object_is_skipped() {
        let plane = plane_with("logs", &["a", "b", "c"]);
        plane.fail_listing_of("b");

        let report = drain_bucket(
            plane.clone(),
            "logs",
            DeletionSettings::default(),
            &CancellationToken::new(),
        )
        .await;

        assert!(report.is_ok_and(|r| r.removed == 2 && r.skipped == 1));
        assert_eq!(plane.objects("logs"), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_drain_reports_cancelled() {
        let plane = plane_with("logs", &["a"]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = drain_bucket(plane, "logs", DeletionSettings::default(), &cancel).await;
        assert!(matches!(result, Err(ReconcileError::Cancelled)));
    }
}
