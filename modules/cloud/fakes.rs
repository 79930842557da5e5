//! In-memory fakes for the capability traits
//!
//! Only compiled for this crate's tests or with the `test-util` feature.
//!
//! Provides `MemoryObjectStore`, `MemoryIdentityProvisioner`,
//! `MemoryJobOrchestrator` and `ScriptedModelInvoker`, each recording enough
//! of what it was asked to do for tests to assert on.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::traits::*;
use crate::modules::error::{ServiceError, StoreError};
use crate::modules::model_runner::{ModelInvoker, ModelResponse};

// ---------------------------------------------------------------------------
// MemoryObjectStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    last_modified: DateTime<Utc>,
}

/// Bucket/key store backed by ordered maps
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    buckets: Mutex<BTreeMap<String, BTreeMap<String, StoredObject>>>,
    fail_puts: Mutex<bool>,
    created: Mutex<Vec<(String, Option<String>)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(bucket: &str) -> Self {
        let store = Self::default();
        store.buckets.lock().unwrap().insert(bucket.to_string(), BTreeMap::new());
        store
    }

    /// Stores an object with an explicit modification time
    pub fn insert_at(&self, bucket: &str, key: &str, body: impl Into<Bytes>, last_modified: DateTime<Utc>) {
        self.buckets
            .lock()
            .unwrap()
            .entry(bucket.to_string())
            .or_default()
            .insert(
                key.to_string(),
                StoredObject {
                    body: body.into(),
                    last_modified,
                },
            );
    }

    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Bytes>) {
        self.insert_at(bucket, key, body, Utc::now());
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|o| o.body.clone())
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Buckets created through the trait, with their location constraint
    pub fn created_buckets(&self) -> Vec<(String, Option<String>)> {
        self.created.lock().unwrap().clone()
    }

    /// Makes every subsequent `put` fail
    pub fn fail_puts(&self) {
        *self.fail_puts.lock().unwrap() = true;
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        Ok(self.buckets.lock().unwrap().contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str, location_constraint: Option<&str>) -> Result<(), StoreError> {
        self.buckets.lock().unwrap().entry(bucket.to_string()).or_default();
        self.created
            .lock()
            .unwrap()
            .push((bucket.to_string(), location_constraint.map(str::to_string)));
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectSummary>, StoreError> {
        let buckets = self.buckets.lock().unwrap();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::NoSuchBucket(bucket.to_string()))?;
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                size_bytes: object.body.len(),
                last_modified: Some(object.last_modified),
            })
            .collect())
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<Option<ObjectSummary>, StoreError> {
        let buckets = self.buckets.lock().unwrap();
        Ok(buckets.get(bucket).and_then(|objects| objects.get(key)).map(|object| ObjectSummary {
            key: key.to_string(),
            size_bytes: object.body.len(),
            last_modified: Some(object.last_modified),
        }))
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        self.object(bucket, key).ok_or_else(|| StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    async fn put(&self, bucket: &str, key: &str, body: Bytes, _content_type: &str) -> Result<(), StoreError> {
        if *self.fail_puts.lock().unwrap() {
            return Err(StoreError::Request(format!("AccessDenied on s3://{}/{}", bucket, key)));
        }
        let mut buckets = self.buckets.lock().unwrap();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::NoSuchBucket(bucket.to_string()))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                body,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        if let Some(objects) = self.buckets.lock().unwrap().get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryIdentityProvisioner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredRole {
    pub arn: String,
    pub trust_policy: String,
    pub policies: HashMap<String, String>,
}

/// Role registry keyed by role name
#[derive(Debug, Default)]
pub struct MemoryIdentityProvisioner {
    account_id: String,
    roles: Mutex<HashMap<String, StoredRole>>,
    creates: Mutex<Vec<String>>,
    denied: Mutex<HashSet<String>>,
}

impl MemoryIdentityProvisioner {
    pub fn new(account_id: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            ..Self::default()
        }
    }

    pub fn role(&self, role_name: &str) -> Option<StoredRole> {
        self.roles.lock().unwrap().get(role_name).cloned()
    }

    /// Names passed to `create_role`, in call order
    pub fn created_roles(&self) -> Vec<String> {
        self.creates.lock().unwrap().clone()
    }

    /// Makes every mutation of `role_name` fail
    pub fn deny(&self, role_name: &str) {
        self.denied.lock().unwrap().insert(role_name.to_string());
    }

    fn check_allowed(&self, role_name: &str) -> Result<(), ServiceError> {
        if self.denied.lock().unwrap().contains(role_name) {
            return Err(ServiceError(format!("AccessDenied for role {}", role_name)));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityProvisioner for MemoryIdentityProvisioner {
    async fn get_role(&self, role_name: &str) -> Result<Option<RoleInfo>, ServiceError> {
        Ok(self.roles.lock().unwrap().get(role_name).map(|role| RoleInfo {
            name: role_name.to_string(),
            arn: role.arn.clone(),
        }))
    }

    async fn create_role(&self, role_name: &str, trust_policy: &str) -> Result<RoleInfo, ServiceError> {
        self.check_allowed(role_name)?;
        let arn = format!("arn:aws:iam::{}:role/{}", self.account_id, role_name);
        self.roles.lock().unwrap().insert(
            role_name.to_string(),
            StoredRole {
                arn: arn.clone(),
                trust_policy: trust_policy.to_string(),
                policies: HashMap::new(),
            },
        );
        self.creates.lock().unwrap().push(role_name.to_string());
        Ok(RoleInfo {
            name: role_name.to_string(),
            arn,
        })
    }

    async fn update_trust_policy(&self, role_name: &str, trust_policy: &str) -> Result<(), ServiceError> {
        self.check_allowed(role_name)?;
        let mut roles = self.roles.lock().unwrap();
        let role = roles
            .get_mut(role_name)
            .ok_or_else(|| ServiceError(format!("NoSuchEntity: {}", role_name)))?;
        role.trust_policy = trust_policy.to_string();
        Ok(())
    }

    async fn put_role_policy(&self, role_name: &str, policy_name: &str, policy: &str) -> Result<(), ServiceError> {
        self.check_allowed(role_name)?;
        let mut roles = self.roles.lock().unwrap();
        let role = roles
            .get_mut(role_name)
            .ok_or_else(|| ServiceError(format!("NoSuchEntity: {}", role_name)))?;
        role.policies.insert(policy_name.to_string(), policy.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryJobOrchestrator
// ---------------------------------------------------------------------------

/// Job service that replays a scripted status sequence
///
/// Each `get_job` pops the next scripted state; once one remains it is
/// repeated forever.
#[derive(Debug, Default)]
pub struct MemoryJobOrchestrator {
    region: String,
    account_id: String,
    submitted: Mutex<Vec<JobRequest>>,
    script: Mutex<VecDeque<JobState>>,
    polls: Mutex<Vec<String>>,
    reject_submissions: Mutex<Option<String>>,
}

impl MemoryJobOrchestrator {
    pub fn new(region: &str, account_id: &str) -> Self {
        Self {
            region: region.to_string(),
            account_id: account_id.to_string(),
            ..Self::default()
        }
    }

    pub fn script_statuses(&self, statuses: &[&str]) {
        let mut script = self.script.lock().unwrap();
        script.clear();
        script.extend(statuses.iter().map(|status| JobState {
            status: status.to_string(),
            message: None,
        }));
    }

    pub fn script_states(&self, states: Vec<JobState>) {
        let mut script = self.script.lock().unwrap();
        script.clear();
        script.extend(states);
    }

    pub fn reject_submissions(&self, reason: &str) {
        *self.reject_submissions.lock().unwrap() = Some(reason.to_string());
    }

    pub fn submitted(&self) -> Vec<JobRequest> {
        self.submitted.lock().unwrap().clone()
    }

    /// Job ids passed to `get_job`, one entry per poll
    pub fn polls(&self) -> Vec<String> {
        self.polls.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobOrchestrator for MemoryJobOrchestrator {
    async fn create_job(&self, request: &JobRequest) -> Result<String, ServiceError> {
        if let Some(reason) = self.reject_submissions.lock().unwrap().clone() {
            return Err(ServiceError(reason));
        }
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(request.clone());
        Ok(format!(
            "arn:aws:bedrock:{}:{}:model-invocation-job/job{:04}",
            self.region,
            self.account_id,
            submitted.len()
        ))
    }

    async fn get_job(&self, job_id: &str) -> Result<JobState, ServiceError> {
        self.polls.lock().unwrap().push(job_id.to_string());
        let mut script = self.script.lock().unwrap();
        let state = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        state.ok_or_else(|| ServiceError(format!("ResourceNotFound: {}", job_id)))
    }
}

// ---------------------------------------------------------------------------
// ScriptedModelInvoker
// ---------------------------------------------------------------------------

/// Interactive model that answers every prompt with the same text
///
/// Prompts containing a registered marker fail instead.
#[derive(Debug, Default)]
pub struct ScriptedModelInvoker {
    reply: String,
    prompts: Mutex<Vec<String>>,
    fail_markers: Mutex<Vec<String>>,
}

impl ScriptedModelInvoker {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            ..Self::default()
        }
    }

    pub fn fail_when_prompt_contains(&self, marker: &str) {
        self.fail_markers.lock().unwrap().push(marker.to_string());
    }

    /// Prompts received, one entry per call
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelInvoker for ScriptedModelInvoker {
    async fn invoke(&self, model_id: &str, prompt: &str, _max_tokens: u32) -> Result<ModelResponse, ServiceError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.fail_markers.lock().unwrap().iter().any(|marker| prompt.contains(marker)) {
            return Err(ServiceError(format!("ThrottlingException from {}", model_id)));
        }
        Ok(ModelResponse {
            text: self.reply.clone(),
            usage: None,
        })
    }
}
