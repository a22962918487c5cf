//! Shared fixtures: an in-memory store, an in-memory control plane and a
//! reconciler wired to both.

#![allow(dead_code)]

use std::sync::Arc;

use silo_core::{
    BucketSpec, PolicySpec, ResourceId, ResourceRecord, ResourceSpec, ServiceAccountSpec,
    UserSpec,
};
use silo_events::{InMemoryRecordStore, RecordStore};
use silo_reconciler::remote::memory::InMemoryControlPlane;
use silo_reconciler::{
    ConnectorRegistry, Gateway, KindSettings, MemoryClientFactory, Profile, ProfileResolver,
    Reconciler, register_all,
};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub struct Harness {
    pub store: Arc<InMemoryRecordStore>,
    pub plane: Arc<InMemoryControlPlane>,
    pub reconciler: Reconciler,
}

impl Harness {
    /// The stored copy of a record, failing the test when it is missing.
    pub async fn stored(&self, id: &ResourceId) -> Result<ResourceRecord, Box<dyn std::error::Error>> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| format!("record {id} missing from store").into())
    }

    pub async fn is_stored(&self, id: &ResourceId) -> bool {
        matches!(self.store.get(id).await, Ok(Some(_)))
    }
}

pub fn harness() -> Harness {
    harness_with(KindSettings::default())
}

pub fn harness_with(settings: KindSettings) -> Harness {
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
    let registry = register_all(ConnectorRegistry::builder(), &gateway, settings).build();
    let reconciler = Reconciler::new(store.clone(), Arc::new(registry));
    Harness {
        store,
        plane,
        reconciler,
    }
}

pub fn bucket(name: &str, spec: BucketSpec) -> ResourceRecord {
    ResourceRecord::new(ResourceId::new(name), ResourceSpec::Bucket(spec))
}

pub fn user(name: &str, policies: &[&str]) -> ResourceRecord {
    ResourceRecord::new(
        ResourceId::new(name),
        ResourceSpec::User(UserSpec {
            policies: policies.iter().map(|p| (*p).to_owned()).collect(),
            ..UserSpec::default()
        }),
    )
}

pub fn raw_policy(name: &str, document: &str) -> ResourceRecord {
    ResourceRecord::new(
        ResourceId::new(name),
        ResourceSpec::Policy(PolicySpec {
            raw_policy: Some(document.to_owned()),
            ..PolicySpec::default()
        }),
    )
}

pub fn service_account(name: &str, spec: ServiceAccountSpec) -> ResourceRecord {
    ResourceRecord::new(ResourceId::new(name), ResourceSpec::ServiceAccount(spec))
}

pub const READ_ONLY: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Action":["s3:GetObject"],"Resource":["arn:aws:s3:::*"]}]}"#;

pub const READ_WRITE: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Action":["s3:GetObject","s3:PutObject"],"Resource":["arn:aws:s3:::*"]}]}"#;
