//! Cloud collaborators behind narrow capability traits
//!
//! - `traits`: `ObjectStore`, `IdentityProvisioner`, `JobOrchestrator`
//! - `aws`: S3, IAM and Bedrock adapters
//! - `fakes`: in-memory implementations for tests (`test-util` feature)

pub mod aws;
#[cfg(any(test, feature = "test-util"))]
pub mod fakes;
pub mod traits;

pub use traits::{
    IdentityProvisioner, JobOrchestrator, JobRequest, JobState, ObjectStore, ObjectSummary,
    RoleInfo,
};

/// Account and region the batch jobs run in
#[derive(Debug, Clone, PartialEq)]
pub struct CloudContext {
    pub region: String,
    pub account_id: String,
}

impl CloudContext {
    /// Full ARN of a model-invocation job from its bare identifier
    pub fn job_arn(&self, job_id: &str) -> String {
        format!(
            "arn:aws:bedrock:{}:{}:model-invocation-job/{}",
            self.region, self.account_id, job_id
        )
    }

    /// Bucket location constraint, `None` for the default region
    pub fn location_constraint(&self) -> Option<&str> {
        if self.region == "us-east-1" {
            None
        } else {
            Some(self.region.as_str())
        }
    }
}
