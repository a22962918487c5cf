//! In-memory control plane.
//!
//! Implements every capability trait against plain maps. Faults can be
//! injected per operation or per object, and every mutating call is counted
//! so callers can assert that a pass left the remote side untouched.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use super::{
    BucketApi, Credentials, NewServiceAccount, ObjectApi, ObjectInfo, PolicyApi, RemoteError,
    RemoteResult, RemoveFailure, RemoveOptions, ServiceAccountApi, ServiceAccountInfo,
    ServiceAccountUpdate, UserApi, UserInfo,
};

#[derive(Debug, Default)]
struct FakeBucket {
    region: String,
    policy: Option<String>,
    object_lock: bool,
    objects: BTreeMap<String, ObjectInfo>,
}

#[derive(Debug)]
struct FakeUser {
    policies: Vec<String>,
    status: String,
    secret: String,
}

#[derive(Debug)]
struct FakeServiceAccount {
    info: ServiceAccountInfo,
}

#[derive(Debug, Default)]
struct Faults {
    /// One-shot failures keyed by operation name.
    next: HashMap<String, RemoteError>,
    /// Objects that fail every removal attempt.
    removal: HashMap<String, RemoteError>,
    /// Objects whose listing entry is an error.
    listing: HashSet<String>,
    lock_query: Option<RemoteError>,
    denied: HashSet<String>,
    redirects: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct State {
    buckets: BTreeMap<String, FakeBucket>,
    users: BTreeMap<String, FakeUser>,
    policies: BTreeMap<String, String>,
    service_accounts: BTreeMap<String, FakeServiceAccount>,
    faults: Faults,
    mutations: usize,
    removal_batches: Vec<usize>,
    next_key: u64,
}

impl State {
    fn take_fault(&mut self, operation: &str) -> RemoteResult<()> {
        self.faults.next.remove(operation).map_or(Ok(()), Err)
    }

    fn mutate(&mut self, operation: &str) -> RemoteResult<()> {
        self.mutations = self.mutations.saturating_add(1);
        self.take_fault(operation)
    }

    fn check_bucket_access(&self, bucket: &str) -> RemoteResult<()> {
        if self.faults.denied.contains(bucket) {
            return Err(RemoteError::forbidden(format!("access to bucket '{bucket}' denied")));
        }
        if let Some(region) = self.faults.redirects.get(bucket) {
            return Err(RemoteError::WrongRegion {
                region: region.clone(),
            });
        }
        Ok(())
    }

    fn bucket(&self, bucket: &str) -> RemoteResult<&FakeBucket> {
        self.buckets
            .get(bucket)
            .ok_or_else(|| RemoteError::not_found(format!("bucket '{bucket}'")))
    }

    fn bucket_mut(&mut self, bucket: &str) -> RemoteResult<&mut FakeBucket> {
        self.buckets
            .get_mut(bucket)
            .ok_or_else(|| RemoteError::not_found(format!("bucket '{bucket}'")))
    }

    fn user_mut(&mut self, user: &str) -> RemoteResult<&mut FakeUser> {
        self.users
            .get_mut(user)
            .ok_or_else(|| RemoteError::not_found(format!("user '{user}'")))
    }

    fn check_policies_exist(&self, policies: &[String]) -> RemoteResult<()> {
        match policies.iter().find(|p| !self.policies.contains_key(p.as_str())) {
            Some(missing) => Err(RemoteError::rejected(format!(
                "policy '{missing}' does not exist"
            ))),
            None => Ok(()),
        }
    }
}

/// A simulated storage control plane.
#[derive(Debug, Default)]
pub struct InMemoryControlPlane {
    state: Mutex<State>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ----- seeding -----

    /// Create a bucket directly, bypassing the mutation counter.
    pub fn insert_bucket(&self, bucket: &str) {
        self.state()
            .buckets
            .entry(bucket.to_owned())
            .or_insert_with(|| FakeBucket {
                region: silo_core::DEFAULT_REGION.to_owned(),
                ..FakeBucket::default()
            });
    }

    /// Store an object, creating the bucket if needed.
    pub fn put_object(&self, bucket: &str, key: &str) {
        self.insert_bucket(bucket);
        if let Some(b) = self.state().buckets.get_mut(bucket) {
            b.objects.insert(key.to_owned(), ObjectInfo::new(key));
        }
    }

    pub fn enable_object_lock(&self, bucket: &str) {
        self.insert_bucket(bucket);
        if let Some(b) = self.state().buckets.get_mut(bucket) {
            b.object_lock = true;
        }
    }

    pub fn insert_user(&self, user: &str, policies: &[&str]) {
        self.state().users.insert(
            user.to_owned(),
            FakeUser {
                policies: policies.iter().map(|p| (*p).to_owned()).collect(),
                status: "enabled".to_owned(),
                secret: String::new(),
            },
        );
    }

    pub fn insert_policy(&self, name: &str, document: &str) {
        self.state()
            .policies
            .insert(name.to_owned(), document.to_owned());
    }

    // ----- fault injection -----

    /// Fail the next call of `operation` (a trait method name) with `error`.
    pub fn fail_next(&self, operation: &str, error: RemoteError) {
        self.state().faults.next.insert(operation.to_owned(), error);
    }

    /// Fail every removal of `key` until [`Self::clear_removal_failures`].
    pub fn fail_removal_of(&self, key: &str, error: RemoteError) {
        self.state().faults.removal.insert(key.to_owned(), error);
    }

    pub fn clear_removal_failures(&self) {
        self.state().faults.removal.clear();
    }

    /// Turn the listing entry for `key` into an error item.
    pub fn fail_listing_of(&self, key: &str) {
        self.state().faults.listing.insert(key.to_owned());
    }

    /// Fail every object-lock query.
    pub fn fail_lock_query(&self, error: RemoteError) {
        self.state().faults.lock_query = Some(error);
    }

    /// Answer every call on `bucket` with access denied.
    pub fn deny_access(&self, bucket: &str) {
        self.state().faults.denied.insert(bucket.to_owned());
    }

    /// Answer every call on `bucket` with a redirect to `region`.
    pub fn redirect(&self, bucket: &str, region: &str) {
        self.state()
            .faults
            .redirects
            .insert(bucket.to_owned(), region.to_owned());
    }

    // ----- inspection -----

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.state().buckets.contains_key(bucket)
    }

    pub fn bucket_region(&self, bucket: &str) -> Option<String> {
        self.state().buckets.get(bucket).map(|b| b.region.clone())
    }

    pub fn bucket_policy_of(&self, bucket: &str) -> Option<String> {
        self.state()
            .buckets
            .get(bucket)
            .and_then(|b| b.policy.clone())
    }

    /// Keys of the objects left in a bucket, sorted.
    pub fn objects(&self, bucket: &str) -> Vec<String> {
        self.state()
            .buckets
            .get(bucket)
            .map(|b| b.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_user(&self, user: &str) -> bool {
        self.state().users.contains_key(user)
    }

    pub fn user_policies(&self, user: &str) -> Option<Vec<String>> {
        self.state().users.get(user).map(|u| u.policies.clone())
    }

    pub fn user_secret(&self, user: &str) -> Option<String> {
        self.state().users.get(user).map(|u| u.secret.clone())
    }

    pub fn policy(&self, name: &str) -> Option<String> {
        self.state().policies.get(name).cloned()
    }

    pub fn service_account(&self, access_key: &str) -> Option<ServiceAccountInfo> {
        self.state()
            .service_accounts
            .get(access_key)
            .map(|sa| sa.info.clone())
    }

    pub fn service_account_count(&self) -> usize {
        self.state().service_accounts.len()
    }

    /// Number of mutating calls received, failed ones included.
    pub fn mutations(&self) -> usize {
        self.state().mutations
    }

    /// Sizes of the bulk removal requests received, in order.
    pub fn removal_batches(&self) -> Vec<usize> {
        self.state().removal_batches.clone()
    }
}

#[async_trait]
impl BucketApi for InMemoryControlPlane {
    async fn bucket_exists(&self, bucket: &str) -> RemoteResult<bool> {
        let mut state = self.state();
        state.take_fault("bucket_exists")?;
        state.check_bucket_access(bucket)?;
        Ok(state.buckets.contains_key(bucket))
    }

    async fn make_bucket(&self, bucket: &str, region: &str) -> RemoteResult<()> {
        let mut state = self.state();
        state.mutate("make_bucket")?;
        state.check_bucket_access(bucket)?;
        if state.buckets.contains_key(bucket) {
            return Err(RemoteError::already_exists(format!("bucket '{bucket}'")));
        }
        state.buckets.insert(
            bucket.to_owned(),
            FakeBucket {
                region: region.to_owned(),
                ..FakeBucket::default()
            },
        );
        Ok(())
    }

    async fn remove_bucket(&self, bucket: &str) -> RemoteResult<()> {
        let mut state = self.state();
        state.mutate("remove_bucket")?;
        state.check_bucket_access(bucket)?;
        if !state.bucket(bucket)?.objects.is_empty() {
            return Err(RemoteError::rejected(format!(
                "bucket '{bucket}' is not empty"
            )));
        }
        state.buckets.remove(bucket);
        Ok(())
    }

    async fn bucket_policy(&self, bucket: &str) -> RemoteResult<Option<String>> {
        let mut state = self.state();
        state.take_fault("bucket_policy")?;
        state.check_bucket_access(bucket)?;
        Ok(state.bucket(bucket)?.policy.clone())
    }

    async fn set_bucket_policy(&self, bucket: &str, policy: &str) -> RemoteResult<()> {
        let mut state = self.state();
        state.mutate("set_bucket_policy")?;
        state.check_bucket_access(bucket)?;
        let b = state.bucket_mut(bucket)?;
        b.policy = (!policy.is_empty()).then(|| policy.to_owned());
        Ok(())
    }

    async fn object_lock_enabled(&self, bucket: &str) -> RemoteResult<bool> {
        let mut state = self.state();
        state.take_fault("object_lock_enabled")?;
        if let Some(err) = state.faults.lock_query.clone() {
            return Err(err);
        }
        Ok(state.bucket(bucket)?.object_lock)
    }
}

#[async_trait]
impl ObjectApi for InMemoryControlPlane {
    fn list_objects(&self, bucket: &str) -> BoxStream<'_, RemoteResult<ObjectInfo>> {
        let items: Vec<RemoteResult<ObjectInfo>> = {
            let mut state = self.state();
            match state
                .take_fault("list_objects")
                .and_then(|()| state.bucket(bucket).map(|_| ()))
            {
                Err(err) => vec![Err(err)],
                Ok(()) => state
                    .bucket(bucket)
                    .map(|b| {
                        b.objects
                            .values()
                            .map(|object| {
                                if state.faults.listing.contains(&object.key) {
                                    Err(RemoteError::rejected(format!(
                                        "cannot list '{}'",
                                        object.key
                                    )))
                                } else {
                                    Ok(object.clone())
                                }
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            }
        };
        stream::iter(items).boxed()
    }

    async fn remove_objects(
        &self,
        bucket: &str,
        objects: Vec<ObjectInfo>,
        options: RemoveOptions,
    ) -> RemoteResult<Vec<RemoveFailure>> {
        let mut state = self.state();
        state.mutate("remove_objects")?;
        state.removal_batches.push(objects.len());

        let removal_faults = state.faults.removal.clone();
        let b = state.bucket_mut(bucket)?;
        let mut failures = Vec::new();
        for object in objects {
            if let Some(error) = removal_faults.get(&object.key) {
                failures.push(RemoveFailure {
                    key: object.key,
                    error: error.clone(),
                });
            } else if b.object_lock && !options.governance_bypass {
                failures.push(RemoveFailure {
                    key: object.key,
                    error: RemoteError::rejected("object is protected by retention"),
                });
            } else {
                b.objects.remove(&object.key);
            }
        }
        Ok(failures)
    }
}

#[async_trait]
impl UserApi for InMemoryControlPlane {
    async fn user_info(&self, user: &str) -> RemoteResult<UserInfo> {
        let mut state = self.state();
        state.take_fault("user_info")?;
        let u = state.user_mut(user)?;
        Ok(UserInfo {
            policies: u.policies.clone(),
            status: u.status.clone(),
        })
    }

    /// Upsert: an existing user keeps its policies and gets the new secret.
    async fn add_user(&self, user: &str, secret: &str) -> RemoteResult<()> {
        let mut state = self.state();
        state.mutate("add_user")?;
        state
            .users
            .entry(user.to_owned())
            .or_insert_with(|| FakeUser {
                policies: Vec::new(),
                status: "enabled".to_owned(),
                secret: String::new(),
            })
            .secret = secret.to_owned();
        Ok(())
    }

    async fn remove_user(&self, user: &str) -> RemoteResult<()> {
        let mut state = self.state();
        state.mutate("remove_user")?;
        state
            .users
            .remove(user)
            .map(|_| ())
            .ok_or_else(|| RemoteError::not_found(format!("user '{user}'")))
    }

    async fn set_user_policies(&self, user: &str, policies: &[String]) -> RemoteResult<()> {
        let mut state = self.state();
        state.mutate("set_user_policies")?;
        state.check_policies_exist(policies)?;
        state.user_mut(user)?.policies = policies.to_vec();
        Ok(())
    }

    async fn attach_user_policies(&self, user: &str, policies: &[String]) -> RemoteResult<()> {
        let mut state = self.state();
        state.mutate("attach_user_policies")?;
        state.check_policies_exist(policies)?;
        let u = state.user_mut(user)?;
        for policy in policies {
            if !u.policies.contains(policy) {
                u.policies.push(policy.clone());
            }
        }
        Ok(())
    }

    async fn detach_user_policies(&self, user: &str, policies: &[String]) -> RemoteResult<()> {
        let mut state = self.state();
        state.mutate("detach_user_policies")?;
        state.user_mut(user)?.policies.retain(|p| !policies.contains(p));
        Ok(())
    }
}

#[async_trait]
impl PolicyApi for InMemoryControlPlane {
    async fn canned_policy(&self, name: &str) -> RemoteResult<String> {
        let mut state = self.state();
        state.take_fault("canned_policy")?;
        state
            .policies
            .get(name)
            .cloned()
            .ok_or_else(|| RemoteError::not_found(format!("policy '{name}'")))
    }

    async fn add_canned_policy(&self, name: &str, document: &str) -> RemoteResult<()> {
        let mut state = self.state();
        state.mutate("add_canned_policy")?;
        if serde_json::from_str::<serde_json::Value>(document).is_err() {
            return Err(RemoteError::rejected("policy document is not valid JSON"));
        }
        state.policies.insert(name.to_owned(), document.to_owned());
        Ok(())
    }

    async fn remove_canned_policy(&self, name: &str) -> RemoteResult<()> {
        let mut state = self.state();
        state.mutate("remove_canned_policy")?;
        state
            .policies
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RemoteError::not_found(format!("policy '{name}'")))
    }

    async fn list_canned_policies(&self) -> RemoteResult<Vec<String>> {
        let mut state = self.state();
        state.take_fault("list_canned_policies")?;
        Ok(state.policies.keys().cloned().collect())
    }
}

#[async_trait]
impl ServiceAccountApi for InMemoryControlPlane {
    async fn service_account_info(&self, access_key: &str) -> RemoteResult<ServiceAccountInfo> {
        let mut state = self.state();
        state.take_fault("service_account_info")?;
        state
            .service_accounts
            .get(access_key)
            .map(|sa| sa.info.clone())
            .ok_or_else(|| RemoteError::not_found(format!("service account '{access_key}'")))
    }

    async fn add_service_account(&self, request: NewServiceAccount) -> RemoteResult<Credentials> {
        let mut state = self.state();
        state.mutate("add_service_account")?;
        if !state.users.contains_key(&request.parent_user) {
            return Err(RemoteError::not_found(format!(
                "user '{}'",
                request.parent_user
            )));
        }
        state.next_key = state.next_key.saturating_add(1);
        let credentials = Credentials {
            access_key: format!("SVCACCT{:08}", state.next_key),
            secret_key: format!("secret-{:08}", state.next_key),
        };
        state.service_accounts.insert(
            credentials.access_key.clone(),
            FakeServiceAccount {
                info: ServiceAccountInfo {
                    parent_user: request.parent_user,
                    name: request.name,
                    description: request.description,
                    expiry: request.expiry,
                    policy: request.policy,
                    status: "on".to_owned(),
                },
            },
        );
        Ok(credentials)
    }

    async fn update_service_account(
        &self,
        access_key: &str,
        update: ServiceAccountUpdate,
    ) -> RemoteResult<()> {
        let mut state = self.state();
        state.mutate("update_service_account")?;
        let sa = state
            .service_accounts
            .get_mut(access_key)
            .ok_or_else(|| RemoteError::not_found(format!("service account '{access_key}'")))?;
        if let Some(description) = update.description {
            sa.info.description = Some(description);
        }
        if let Some(expiry) = update.expiry {
            sa.info.expiry = Some(expiry);
        }
        if let Some(policy) = update.policy {
            sa.info.policy = (!policy.is_empty()).then_some(policy);
        }
        Ok(())
    }

    async fn delete_service_account(&self, access_key: &str) -> RemoteResult<()> {
        let mut state = self.state();
        state.mutate("delete_service_account")?;
        state
            .service_accounts
            .remove(access_key)
            .map(|_| ())
            .ok_or_else(|| RemoteError::not_found(format!("service account '{access_key}'")))
    }
}
