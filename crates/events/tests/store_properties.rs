//! Property-based tests for the in-memory record store using proptest.
//!
//! Properties verified:
//! - Generation counts spec changes, not applies
//! - Engine-owned fields survive user applies
//! - Every stored record is reachable through `list`

use silo_core::{
    BucketSpec, Condition, DeletionPolicy, Metadata, RecordStatus, ResourceId, ResourceRecord,
    ResourceSpec, lock,
};
use silo_events::{InMemoryRecordStore, RecordStore};
use proptest::prelude::*;

/// Test helper: Unwrap a Result or panic with context
fn unwrap_result<T, E: std::fmt::Display>(result: std::result::Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{}: {}", context, e),
    }
}

fn runtime() -> tokio::runtime::Runtime {
    unwrap_result(
        tokio::runtime::Builder::new_current_thread().enable_all().build(),
        "runtime creation should succeed",
    )
}

fn bucket_with_region(region: u8) -> ResourceRecord {
    ResourceRecord::new(
        ResourceId::new("logs"),
        ResourceSpec::Bucket(BucketSpec {
            region: Some(format!("region-{region}")),
            deletion_policy: DeletionPolicy::DeleteAll,
            ..BucketSpec::default()
        }),
    )
}

/// Number of times consecutive values differ, i.e. how many applies changed the spec.
fn changes(regions: &[u8]) -> u64 {
    let count = regions.windows(2).filter(|w| w[0] != w[1]).count();
    u64::try_from(count).unwrap_or(u64::MAX)
}

proptest! {
    /// Property: the generation starts at 1 and grows by one per actual spec
    /// change, however many identical applies happen in between.
    #[test]
    fn prop_generation_counts_spec_changes(regions in prop::collection::vec(0u8..4, 1..30)) {
        let rt = runtime();
        let store = InMemoryRecordStore::new();

        let last = rt.block_on(async {
            let mut last = None;
            for region in &regions {
                last = Some(unwrap_result(
                    store.apply(bucket_with_region(*region)).await,
                    "apply should succeed",
                ));
            }
            last
        });

        prop_assert_eq!(last.map(|r| r.generation), Some(1 + changes(&regions)));
    }

    /// Property: status and markers written by the engine are never lost
    /// when the user re-applies the record.
    #[test]
    fn prop_apply_preserves_engine_fields(regions in prop::collection::vec(0u8..4, 1..10)) {
        let rt = runtime();
        let store = InMemoryRecordStore::new();
        let id = ResourceId::new("logs");

        let record = rt.block_on(async {
            unwrap_result(store.apply(bucket_with_region(0)).await, "first apply");

            let mut metadata = Metadata::new();
            lock::claim(&mut metadata);
            unwrap_result(store.put_metadata(&id, metadata).await, "put metadata");

            let mut status = RecordStatus::default();
            status.set_condition(Condition::available());
            unwrap_result(store.put_status(&id, status).await, "put status");

            for region in &regions {
                unwrap_result(store.apply(bucket_with_region(*region)).await, "apply");
            }
            unwrap_result(store.get(&id).await, "get")
        });

        prop_assert!(record.as_ref().is_some_and(|r| lock::is_claimed(&r.metadata)));
        prop_assert!(record.as_ref().is_some_and(|r| r.status.is_ready()));
    }

    /// Property: distinct names yield distinct records, all listed.
    #[test]
    fn prop_list_returns_every_record(names in prop::collection::btree_set("[a-z]{3,8}", 0..20)) {
        let rt = runtime();
        let store = InMemoryRecordStore::new();

        let listed = rt.block_on(async {
            for name in &names {
                let record = ResourceRecord::new(
                    ResourceId::new(name.clone()),
                    ResourceSpec::Bucket(BucketSpec::default()),
                );
                unwrap_result(store.apply(record).await, "apply");
            }
            unwrap_result(store.list().await, "list")
        });

        let listed: Vec<String> = listed.into_iter().map(|r| r.id.name).collect();
        let expected: Vec<String> = names.into_iter().collect();
        prop_assert_eq!(listed, expected);
    }
}
