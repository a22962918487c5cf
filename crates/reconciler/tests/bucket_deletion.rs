//! Deleting a `DeleteAll` bucket through the reconciler: the bucket is
//! emptied first, a failed object stops everything, and the next pass
//! finishes the job.

mod common;

use silo_core::{BucketSpec, DeletionPolicy, lock};
use silo_reconciler::remote::RemoteError;
use silo_reconciler::{Outcome, ReconcileError};
use tokio_util::sync::CancellationToken;

use common::{TestResult, bucket, harness};

fn delete_all() -> BucketSpec {
    BucketSpec {
        deletion_policy: DeletionPolicy::DeleteAll,
        ..BucketSpec::default()
    }
}

#[tokio::test]
async fn given_bucket_with_three_objects_when_deleted_then_all_removed() -> TestResult {
    // Given: an owned DeleteAll bucket holding a, b and c
    let h = harness();
    let record = bucket("my-bucket", delete_all());
    h.store.apply(record.clone()).await?;
    h.reconciler
        .reconcile(&record.id, &CancellationToken::new())
        .await?;
    for key in ["a", "b", "c"] {
        h.plane.put_object("my-bucket", key);
    }

    // When: deletion is requested and reconciled
    h.store.request_deletion(&record.id).await?;
    let outcome = h
        .reconciler
        .reconcile(&record.id, &CancellationToken::new())
        .await?;

    // Then: objects, bucket and record are gone
    assert_eq!(outcome, Outcome::Deleted);
    assert!(!h.plane.has_bucket("my-bucket"));
    assert_eq!(h.plane.removal_batches().iter().sum::<usize>(), 3);
    assert!(!h.is_stored(&record.id).await);
    Ok(())
}

#[tokio::test]
async fn given_object_b_fails_when_deleted_then_error_names_b_and_bucket_stays() -> TestResult {
    // Given: an owned DeleteAll bucket where removing b fails transiently
    let h = harness();
    let record = bucket("my-bucket", delete_all());
    h.store.apply(record.clone()).await?;
    h.reconciler
        .reconcile(&record.id, &CancellationToken::new())
        .await?;
    for key in ["a", "b", "c"] {
        h.plane.put_object("my-bucket", key);
    }
    h.plane
        .fail_removal_of("b", RemoteError::unavailable("connection reset"));
    h.store.request_deletion(&record.id).await?;

    // When
    let result = h
        .reconciler
        .reconcile(&record.id, &CancellationToken::new())
        .await;

    // Then: the error references b, bucket and record remain
    assert!(matches!(
        &result,
        Err(ReconcileError::PartialDeletion { object, .. }) if object == "b"
    ));
    assert!(result.is_err_and(|e| e.is_retryable()));
    assert!(h.plane.has_bucket("my-bucket"));
    assert!(h.plane.objects("my-bucket").contains(&"b".to_owned()));
    let stored = h.stored(&record.id).await?;
    assert!(stored.status.sync_error().is_some_and(|m| m.contains("\"b\"")));

    // And: once b can be removed, the next pass re-lists and finishes
    h.plane.clear_removal_failures();
    let outcome = h
        .reconciler
        .reconcile(&record.id, &CancellationToken::new())
        .await?;
    assert_eq!(outcome, Outcome::Deleted);
    assert!(!h.plane.has_bucket("my-bucket"));
    assert!(!h.is_stored(&record.id).await);
    Ok(())
}

#[tokio::test]
async fn given_delete_if_empty_bucket_with_objects_when_deleted_then_rejected() -> TestResult {
    // Given: an owned bucket that must be empty to be removed
    let h = harness();
    let mut record = bucket("keep", BucketSpec::default());
    lock::claim(&mut record.metadata);
    h.plane.put_object("keep", "a");
    h.store.apply(record.clone()).await?;
    h.store.request_deletion(&record.id).await?;

    // When
    let result = h
        .reconciler
        .reconcile(&record.id, &CancellationToken::new())
        .await;

    // Then: nothing is removed
    assert!(matches!(result, Err(ReconcileError::Rejected { .. })));
    assert_eq!(h.plane.objects("keep"), vec!["a".to_owned()]);
    assert!(h.is_stored(&record.id).await);
    Ok(())
}

#[tokio::test]
async fn given_retention_bucket_when_deleted_then_governance_bypassed() -> TestResult {
    // Given: an owned DeleteAll bucket with object lock
    let h = harness();
    let mut record = bucket("vault", delete_all());
    lock::claim(&mut record.metadata);
    h.plane.put_object("vault", "a");
    h.plane.enable_object_lock("vault");
    h.store.apply(record.clone()).await?;
    h.store.request_deletion(&record.id).await?;

    // When
    let outcome = h
        .reconciler
        .reconcile(&record.id, &CancellationToken::new())
        .await?;

    // Then
    assert_eq!(outcome, Outcome::Deleted);
    assert!(!h.plane.has_bucket("vault"));
    Ok(())
}
