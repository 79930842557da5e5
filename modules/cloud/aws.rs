//! AWS implementations of the capability traits

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_bedrock::types::{
    ModelInvocationJobInputDataConfig, ModelInvocationJobOutputDataConfig,
    ModelInvocationJobS3InputDataConfig, ModelInvocationJobS3OutputDataConfig,
};
use aws_sdk_bedrock::Client as BedrockControlClient;
use aws_sdk_iam::Client as IamClient;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::{ByteStream, DateTime as SmithyDateTime};
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use super::traits::{
    IdentityProvisioner, JobOrchestrator, JobRequest, JobState, ObjectStore, ObjectSummary,
    RoleInfo,
};
use super::CloudContext;
use crate::modules::error::{ServiceError, StoreError};

/// Loads the shared SDK config for `region` and resolves the caller's account id
pub async fn load_cloud_context(region: &str) -> anyhow::Result<(SdkConfig, CloudContext)> {
    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await;

    let identity = aws_sdk_sts::Client::new(&sdk_config)
        .get_caller_identity()
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to resolve AWS account id: {}", DisplayErrorContext(&e)))?;
    let account_id = identity
        .account()
        .ok_or_else(|| anyhow::anyhow!("STS returned no account id"))?
        .to_string();

    info!("Using AWS account {} in region {}", account_id, region);
    Ok((
        sdk_config,
        CloudContext {
            region: region.to_string(),
            account_id,
        },
    ))
}

fn to_chrono(timestamp: &SmithyDateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(timestamp.secs(), timestamp.subsec_nanos())
}

/// S3-backed [`ObjectStore`]
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error().map(|se| se.is_not_found()).unwrap_or(false) {
                    Ok(false)
                } else {
                    Err(StoreError::Request(format!(
                        "Error checking bucket {}: {}",
                        bucket,
                        DisplayErrorContext(&e)
                    )))
                }
            }
        }
    }

    async fn create_bucket(&self, bucket: &str, location_constraint: Option<&str>) -> Result<(), StoreError> {
        let mut request = self.client.create_bucket().bucket(bucket);
        if let Some(region) = location_constraint {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }
        request.send().await.map_err(|e| {
            StoreError::Request(format!("Error creating bucket {}: {}", bucket, DisplayErrorContext(&e)))
        })?;
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectSummary>, StoreError> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .max_keys(1000);

            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| {
                StoreError::Request(format!(
                    "Failed to list s3://{}/{}: {}",
                    bucket,
                    prefix,
                    DisplayErrorContext(&e)
                ))
            })?;

            for object in response.contents() {
                let key = object.key().unwrap_or_default();
                if key.is_empty() || key.ends_with('/') {
                    continue;
                }
                objects.push(ObjectSummary {
                    key: key.to_string(),
                    size_bytes: object.size().unwrap_or(0).max(0) as usize,
                    last_modified: object.last_modified().and_then(to_chrono),
                });
            }

            continuation_token = response.next_continuation_token().map(|s| s.to_string());
            if continuation_token.is_none() {
                break;
            }
        }

        debug!("Listed {} objects under s3://{}/{}", objects.len(), bucket, prefix);
        Ok(objects)
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<Option<ObjectSummary>, StoreError> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(response) => Ok(Some(ObjectSummary {
                key: key.to_string(),
                size_bytes: response.content_length().unwrap_or(0).max(0) as usize,
                last_modified: response.last_modified().and_then(to_chrono),
            })),
            Err(e) => {
                if e.as_service_error().map(|se| se.is_not_found()).unwrap_or(false) {
                    Ok(None)
                } else {
                    Err(StoreError::Request(format!(
                        "Failed to get metadata for s3://{}/{}: {}",
                        bucket,
                        key,
                        DisplayErrorContext(&e)
                    )))
                }
            }
        }
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) {
                    StoreError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    StoreError::Request(format!(
                        "Failed to download s3://{}/{}: {}",
                        bucket,
                        key,
                        DisplayErrorContext(&e)
                    ))
                }
            })?;

        let expected = response.content_length().unwrap_or(0).max(0) as usize;
        let mut body = response.body.into_async_read();
        let mut buffer = Vec::with_capacity(expected);
        body.read_to_end(&mut buffer).await.map_err(|e| {
            StoreError::Request(format!("Failed to read S3 object body for {}: {}", key, e))
        })?;

        Ok(Bytes::from(buffer))
    }

    async fn put(&self, bucket: &str, key: &str, body: Bytes, content_type: &str) -> Result<(), StoreError> {
        info!("Uploading {} bytes to s3://{}/{}", body.len(), bucket, key);
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body.to_vec()))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                StoreError::Request(format!(
                    "Failed to upload {} to S3 bucket {}: {}",
                    key,
                    bucket,
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                StoreError::Request(format!(
                    "Failed to delete s3://{}/{}: {}",
                    bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }
}

/// IAM-backed [`IdentityProvisioner`]
pub struct IamProvisioner {
    client: IamClient,
}

impl IamProvisioner {
    pub fn new(client: IamClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IdentityProvisioner for IamProvisioner {
    async fn get_role(&self, role_name: &str) -> Result<Option<RoleInfo>, ServiceError> {
        match self.client.get_role().role_name(role_name).send().await {
            Ok(response) => Ok(response.role().map(|role| RoleInfo {
                name: role.role_name().to_string(),
                arn: role.arn().to_string(),
            })),
            Err(e) => {
                if e.as_service_error()
                    .map(|se| se.is_no_such_entity_exception())
                    .unwrap_or(false)
                {
                    Ok(None)
                } else {
                    Err(ServiceError(format!(
                        "Failed to look up role {}: {}",
                        role_name,
                        DisplayErrorContext(&e)
                    )))
                }
            }
        }
    }

    async fn create_role(&self, role_name: &str, trust_policy: &str) -> Result<RoleInfo, ServiceError> {
        let response = self
            .client
            .create_role()
            .role_name(role_name)
            .assume_role_policy_document(trust_policy)
            .send()
            .await
            .map_err(|e| {
                ServiceError(format!("Failed to create role {}: {}", role_name, DisplayErrorContext(&e)))
            })?;

        response
            .role()
            .map(|role| RoleInfo {
                name: role.role_name().to_string(),
                arn: role.arn().to_string(),
            })
            .ok_or_else(|| ServiceError(format!("IAM returned no role for {}", role_name)))
    }

    async fn update_trust_policy(&self, role_name: &str, trust_policy: &str) -> Result<(), ServiceError> {
        self.client
            .update_assume_role_policy()
            .role_name(role_name)
            .policy_document(trust_policy)
            .send()
            .await
            .map_err(|e| {
                ServiceError(format!(
                    "Failed to update trust policy of {}: {}",
                    role_name,
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }

    async fn put_role_policy(&self, role_name: &str, policy_name: &str, policy: &str) -> Result<(), ServiceError> {
        self.client
            .put_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .policy_document(policy)
            .send()
            .await
            .map_err(|e| {
                ServiceError(format!(
                    "Failed to put policy {} on {}: {}",
                    policy_name,
                    role_name,
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }
}

/// Bedrock model-invocation-job backed [`JobOrchestrator`]
pub struct BedrockJobOrchestrator {
    client: BedrockControlClient,
    context: CloudContext,
}

impl BedrockJobOrchestrator {
    pub fn new(client: BedrockControlClient, context: CloudContext) -> Self {
        Self { client, context }
    }
}

#[async_trait]
impl JobOrchestrator for BedrockJobOrchestrator {
    async fn create_job(&self, request: &JobRequest) -> Result<String, ServiceError> {
        let input = ModelInvocationJobS3InputDataConfig::builder()
            .s3_uri(&request.input_uri)
            .build()
            .map_err(|e| ServiceError(format!("Invalid input location: {}", e)))?;
        let output = ModelInvocationJobS3OutputDataConfig::builder()
            .s3_uri(&request.output_uri)
            .build()
            .map_err(|e| ServiceError(format!("Invalid output location: {}", e)))?;

        let response = self
            .client
            .create_model_invocation_job()
            .job_name(&request.job_name)
            .model_id(&request.model_id)
            .role_arn(&request.role_arn)
            .input_data_config(ModelInvocationJobInputDataConfig::S3InputDataConfig(input))
            .output_data_config(ModelInvocationJobOutputDataConfig::S3OutputDataConfig(output))
            .send()
            .await
            .map_err(|e| ServiceError(format!("{}", DisplayErrorContext(&e))))?;

        Ok(response.job_arn().to_string())
    }

    async fn get_job(&self, job_id: &str) -> Result<JobState, ServiceError> {
        let response = self
            .client
            .get_model_invocation_job()
            .job_identifier(self.context.job_arn(job_id))
            .send()
            .await
            .map_err(|e| ServiceError(format!("{}", DisplayErrorContext(&e))))?;

        Ok(JobState {
            status: response
                .status()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            message: response.message().map(|m| m.to_string()),
        })
    }
}
