//! Storage/identity preconditions and job submission

use bytes::Bytes;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::job::{job_id_from_arn, JobDescriptor};
use super::wait::Waiter;
use crate::modules::cloud::{CloudContext, IdentityProvisioner, JobOrchestrator, JobRequest, ObjectStore};
use crate::modules::error::{ProvisioningError, SubmissionError};

/// Role usability after an IAM mutation is eventually consistent
pub const DEFAULT_IAM_PROPAGATION: Duration = Duration::from_secs(50);

const PROBE_KEY: &str = "test-permissions.txt";

pub struct BatchSubmissionCoordinator {
    store: Arc<dyn ObjectStore>,
    identity: Arc<dyn IdentityProvisioner>,
    orchestrator: Arc<dyn JobOrchestrator>,
    waiter: Arc<dyn Waiter>,
    context: CloudContext,
    model_id: String,
    iam_propagation: Duration,
}

impl BatchSubmissionCoordinator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        identity: Arc<dyn IdentityProvisioner>,
        orchestrator: Arc<dyn JobOrchestrator>,
        waiter: Arc<dyn Waiter>,
        context: CloudContext,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            identity,
            orchestrator,
            waiter,
            context,
            model_id: model_id.into(),
            iam_propagation: DEFAULT_IAM_PROPAGATION,
        }
    }

    pub fn with_iam_propagation(mut self, delay: Duration) -> Self {
        self.iam_propagation = delay;
        self
    }

    /// Makes sure `bucket` exists and that we can list, write and delete in it
    pub async fn ensure_preconditions(&self, bucket: &str) -> Result<(), ProvisioningError> {
        info!("Checking if S3 bucket {} exists", bucket);
        let exists = self
            .store
            .bucket_exists(bucket)
            .await
            .map_err(|e| ProvisioningError::Bucket {
                bucket: bucket.to_string(),
                reason: e.to_string(),
            })?;

        if exists {
            info!("Bucket {} already exists", bucket);
        } else {
            info!("Bucket {} does not exist. Creating new bucket", bucket);
            self.store
                .create_bucket(bucket, self.context.location_constraint())
                .await
                .map_err(|e| ProvisioningError::Bucket {
                    bucket: bucket.to_string(),
                    reason: e.to_string(),
                })?;
            info!("Created new bucket: {}", bucket);
        }

        self.probe_permissions(bucket).await.map_err(|reason| {
            error!("S3 permission verification failed: {}", reason);
            ProvisioningError::Probe {
                bucket: bucket.to_string(),
                reason,
            }
        })?;
        info!("Successfully verified S3 permissions on {}", bucket);
        Ok(())
    }

    async fn probe_permissions(&self, bucket: &str) -> Result<(), String> {
        self.store.list(bucket, "").await.map_err(|e| e.to_string())?;
        self.store
            .put(bucket, PROBE_KEY, Bytes::from_static(b"Testing write permissions"), "text/plain")
            .await
            .map_err(|e| e.to_string())?;
        self.store.delete(bucket, PROBE_KEY).await.map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Trust policy letting the job service assume the role from this account only
    pub fn trust_policy(&self) -> serde_json::Value {
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": {"Service": "bedrock.amazonaws.com"},
                "Action": "sts:AssumeRole",
                "Condition": {
                    "StringEquals": {"aws:SourceAccount": self.context.account_id},
                    "ArnEquals": {
                        "aws:SourceArn": format!(
                            "arn:aws:bedrock:{}:{}:model-invocation-job/*",
                            self.context.region, self.context.account_id
                        )
                    }
                }
            }]
        })
    }

    /// Storage permissions scoped to `bucket`
    pub fn permission_policy(bucket: &str) -> serde_json::Value {
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Action": ["s3:*"],
                "Resource": [
                    format!("arn:aws:s3:::{}", bucket),
                    format!("arn:aws:s3:::{}/*", bucket)
                ]
            }]
        })
    }

    /// Creates the role, or overwrites both of its policies, then waits for propagation
    ///
    /// Returns the role ARN.
    pub async fn ensure_role(&self, role_name: &str, bucket: &str) -> Result<String, ProvisioningError> {
        let role_error = |reason: String| {
            error!("Error creating/updating IAM role {}: {}", role_name, reason);
            ProvisioningError::Role {
                role: role_name.to_string(),
                reason,
            }
        };

        let trust_policy = self.trust_policy().to_string();
        let permission_policy = Self::permission_policy(bucket).to_string();
        let policy_name = format!("{}-policy", role_name);

        let existing = self
            .identity
            .get_role(role_name)
            .await
            .map_err(|e| role_error(e.to_string()))?;

        let role_arn = match existing {
            Some(role) => {
                info!("IAM role {} already exists with ARN: {}", role_name, role.arn);
                self.identity
                    .update_trust_policy(role_name, &trust_policy)
                    .await
                    .map_err(|e| role_error(e.to_string()))?;
                info!("Updated trust policy for existing role: {}", role_name);
                role.arn
            }
            None => {
                let role = self
                    .identity
                    .create_role(role_name, &trust_policy)
                    .await
                    .map_err(|e| role_error(e.to_string()))?;
                info!("Created new IAM role: {} with ARN: {}", role_name, role.arn);
                role.arn
            }
        };

        self.identity
            .put_role_policy(role_name, &policy_name, &permission_policy)
            .await
            .map_err(|e| role_error(e.to_string()))?;
        info!("Attached permission policy {} to role {}", policy_name, role_name);

        info!("Waiting {:?} for IAM role to propagate...", self.iam_propagation);
        if !self.waiter.wait(self.iam_propagation).await {
            return Err(role_error("cancelled while waiting for role propagation".to_string()));
        }
        Ok(role_arn)
    }

    /// Creates the batch job and returns its descriptor in SUBMITTED state
    pub async fn submit(
        &self,
        job_name: &str,
        input_uri: &str,
        output_uri: &str,
        role_arn: &str,
    ) -> Result<JobDescriptor, SubmissionError> {
        info!("Creating batch inference job: {}", job_name);
        let request = JobRequest {
            job_name: job_name.to_string(),
            model_id: self.model_id.clone(),
            input_uri: input_uri.to_string(),
            output_uri: output_uri.to_string(),
            role_arn: role_arn.to_string(),
        };

        let job_arn = self.orchestrator.create_job(&request).await.map_err(|e| {
            error!("Error creating batch inference job: {}", e);
            SubmissionError::Request(e.to_string())
        })?;
        let job_id = job_id_from_arn(&job_arn)
            .ok_or_else(|| SubmissionError::MalformedArn(job_arn.clone()))?
            .to_string();

        info!("Created batch inference job: {}", job_id);
        Ok(JobDescriptor::submitted(
            job_id,
            job_name.to_string(),
            input_uri.to_string(),
            output_uri.to_string(),
            role_arn.to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::batch::job::JobStatus;
    use crate::modules::batch::wait::RecordingWaiter;
    use crate::modules::cloud::fakes::{MemoryIdentityProvisioner, MemoryJobOrchestrator, MemoryObjectStore};

    struct Harness {
        store: Arc<MemoryObjectStore>,
        identity: Arc<MemoryIdentityProvisioner>,
        orchestrator: Arc<MemoryJobOrchestrator>,
        waiter: Arc<RecordingWaiter>,
        coordinator: BatchSubmissionCoordinator,
    }

    fn harness(store: MemoryObjectStore, region: &str) -> Harness {
        let store = Arc::new(store);
        let identity = Arc::new(MemoryIdentityProvisioner::new("123456789012"));
        let orchestrator = Arc::new(MemoryJobOrchestrator::new(region, "123456789012"));
        let waiter = Arc::new(RecordingWaiter::new());
        let coordinator = BatchSubmissionCoordinator::new(
            store.clone(),
            identity.clone(),
            orchestrator.clone(),
            waiter.clone(),
            CloudContext {
                region: region.to_string(),
                account_id: "123456789012".to_string(),
            },
            "anthropic.claude-3-5-sonnet-20241022-v2:0",
        );
        Harness {
            store,
            identity,
            orchestrator,
            waiter,
            coordinator,
        }
    }

    #[tokio::test]
    async fn test_preconditions_create_missing_bucket_with_region() {
        let h = harness(MemoryObjectStore::new(), "us-west-2");
        h.coordinator.ensure_preconditions("aud-bucket").await.unwrap();

        assert_eq!(
            h.store.created_buckets(),
            vec![("aud-bucket".to_string(), Some("us-west-2".to_string()))]
        );
        // probe object is cleaned up
        assert!(h.store.keys("aud-bucket").is_empty());
    }

    #[tokio::test]
    async fn test_preconditions_keep_existing_bucket() {
        let h = harness(MemoryObjectStore::with_bucket("aud-bucket"), "us-east-1");
        h.coordinator.ensure_preconditions("aud-bucket").await.unwrap();
        assert!(h.store.created_buckets().is_empty());
    }

    #[tokio::test]
    async fn test_probe_failure_is_provisioning_error() {
        let store = MemoryObjectStore::with_bucket("aud-bucket");
        store.fail_puts();
        let h = harness(store, "us-west-2");
        let err = h.coordinator.ensure_preconditions("aud-bucket").await.unwrap_err();
        assert!(matches!(err, ProvisioningError::Probe { .. }));
    }

    #[tokio::test]
    async fn test_ensure_role_creates_then_overwrites() {
        let h = harness(MemoryObjectStore::new(), "us-west-2");

        let arn = h.coordinator.ensure_role("aud-batch-1", "bucket-a").await.unwrap();
        assert_eq!(arn, "arn:aws:iam::123456789012:role/aud-batch-1");
        let role = h.identity.role("aud-batch-1").unwrap();
        assert!(role.trust_policy.contains("model-invocation-job/*"));
        assert!(role.policies["aud-batch-1-policy"].contains("arn:aws:s3:::bucket-a/*"));

        let again = h.coordinator.ensure_role("aud-batch-1", "bucket-b").await.unwrap();
        assert_eq!(again, arn);
        let role = h.identity.role("aud-batch-1").unwrap();
        assert_eq!(role.policies.len(), 1);
        assert!(role.policies["aud-batch-1-policy"].contains("bucket-b"));
        assert!(!role.policies["aud-batch-1-policy"].contains("bucket-a"));
        assert_eq!(h.identity.created_roles(), vec!["aud-batch-1"]);

        // one propagation wait per mutation
        assert_eq!(h.waiter.waits(), vec![DEFAULT_IAM_PROPAGATION; 2]);
    }

    #[tokio::test]
    async fn test_role_failure_is_provisioning_error() {
        let h = harness(MemoryObjectStore::new(), "us-west-2");
        h.identity.deny("aud-batch-1");
        let err = h.coordinator.ensure_role("aud-batch-1", "bucket").await.unwrap_err();
        assert!(matches!(err, ProvisioningError::Role { role, .. } if role == "aud-batch-1"));
        assert!(h.waiter.waits().is_empty());
    }

    #[test]
    fn test_trust_policy_is_scoped_to_account() {
        let h = harness(MemoryObjectStore::new(), "us-west-2");
        let policy = h.coordinator.trust_policy();
        let statement = &policy["Statement"][0];
        assert_eq!(statement["Condition"]["StringEquals"]["aws:SourceAccount"], "123456789012");
        assert_eq!(
            statement["Condition"]["ArnEquals"]["aws:SourceArn"],
            "arn:aws:bedrock:us-west-2:123456789012:model-invocation-job/*"
        );
    }

    #[tokio::test]
    async fn test_submit_extracts_job_id() {
        let h = harness(MemoryObjectStore::new(), "us-west-2");
        let job = h
            .coordinator
            .submit("aud-batch-1", "s3://b/input/a.jsonl", "s3://b/output/", "arn:role")
            .await
            .unwrap();

        assert_eq!(job.job_id, "job0001");
        assert_eq!(job.status(), &JobStatus::Submitted);
        let submitted = h.orchestrator.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].input_uri, "s3://b/input/a.jsonl");
        assert_eq!(submitted[0].model_id, "anthropic.claude-3-5-sonnet-20241022-v2:0");
    }

    #[tokio::test]
    async fn test_submit_failure_is_not_retried() {
        let h = harness(MemoryObjectStore::new(), "us-west-2");
        h.orchestrator.reject_submissions("ValidationException: bad role");
        let err = h
            .coordinator
            .submit("aud-batch-1", "s3://b/in", "s3://b/out/", "arn:role")
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::Request(msg) if msg.contains("bad role")));
        assert!(h.orchestrator.submitted().is_empty());
    }
}
