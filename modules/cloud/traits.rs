//! Capability interfaces the pipeline is written against
//!
//! Production code plugs in the AWS adapters from [`super::aws`]; tests use
//! the in-memory fakes from [`super::fakes`].

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::modules::error::{ServiceError, StoreError};

/// Listing entry for one stored object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSummary {
    pub key: String,
    pub size_bytes: usize,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Bucket/key blob storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError>;

    /// Creates `bucket`, pinned to `location_constraint` when one is given
    async fn create_bucket(&self, bucket: &str, location_constraint: Option<&str>) -> Result<(), StoreError>;

    /// All objects whose key starts with `prefix`, across every listing page
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectSummary>, StoreError>;

    /// Metadata for one key, `None` when it does not exist
    async fn head(&self, bucket: &str, key: &str) -> Result<Option<ObjectSummary>, StoreError>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError>;

    async fn put(&self, bucket: &str, key: &str, body: Bytes, content_type: &str) -> Result<(), StoreError>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError>;
}

/// A service role as the identity provider reports it
#[derive(Debug, Clone, PartialEq)]
pub struct RoleInfo {
    pub name: String,
    pub arn: String,
}

/// Create/update access to service roles and their inline policies
#[async_trait]
pub trait IdentityProvisioner: Send + Sync {
    async fn get_role(&self, role_name: &str) -> Result<Option<RoleInfo>, ServiceError>;

    async fn create_role(&self, role_name: &str, trust_policy: &str) -> Result<RoleInfo, ServiceError>;

    async fn update_trust_policy(&self, role_name: &str, trust_policy: &str) -> Result<(), ServiceError>;

    /// Creates or replaces the inline policy `policy_name` on the role
    async fn put_role_policy(&self, role_name: &str, policy_name: &str, policy: &str) -> Result<(), ServiceError>;
}

/// Parameters of one asynchronous inference job
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub job_name: String,
    pub model_id: String,
    pub input_uri: String,
    pub output_uri: String,
    pub role_arn: String,
}

/// Raw status report for a job
#[derive(Debug, Clone, PartialEq)]
pub struct JobState {
    pub status: String,
    pub message: Option<String>,
}

/// Asynchronous batch inference service
#[async_trait]
pub trait JobOrchestrator: Send + Sync {
    /// Submits the job and returns its ARN
    async fn create_job(&self, request: &JobRequest) -> Result<String, ServiceError>;

    async fn get_job(&self, job_id: &str) -> Result<JobState, ServiceError>;
}
