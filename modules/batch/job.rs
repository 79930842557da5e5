//! Job descriptors and status values

use std::fmt;

/// Status of an asynchronous inference job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Submitted,
    InProgress,
    Completed,
    Failed,
    Stopped,
    /// Any other provider status (`Validating`, `Scheduled`, `Stopping`, ...)
    Other(String),
}

impl JobStatus {
    /// Case-insensitive parse; `InProgress` and `IN_PROGRESS` are the same status
    pub fn parse(raw: &str) -> Self {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_uppercase)
            .collect();
        match normalized.as_str() {
            "SUBMITTED" => Self::Submitted,
            "INPROGRESS" => Self::InProgress,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            "STOPPED" => Self::Stopped,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted => write!(f, "SUBMITTED"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Other(raw) => write!(f, "{}", raw),
        }
    }
}

/// A submitted job. Its status only changes through the status monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescriptor {
    pub job_id: String,
    pub job_name: String,
    pub input_location: String,
    pub output_location: String,
    pub role_arn: String,
    status: JobStatus,
    failure_message: Option<String>,
}

impl JobDescriptor {
    pub fn submitted(
        job_id: String,
        job_name: String,
        input_location: String,
        output_location: String,
        role_arn: String,
    ) -> Self {
        Self {
            job_id,
            job_name,
            input_location,
            output_location,
            role_arn,
            status: JobStatus::Submitted,
            failure_message: None,
        }
    }

    pub fn status(&self) -> &JobStatus {
        &self.status
    }

    /// Provider's explanation for a failed or stopped job
    pub fn failure_message(&self) -> Option<&str> {
        self.failure_message.as_deref()
    }

    pub(crate) fn record_status(&mut self, status: JobStatus, message: Option<String>) {
        if status.is_terminal() && status != JobStatus::Completed {
            self.failure_message = message;
        }
        self.status = status;
    }
}

/// Bare job identifier: everything after the last `/` of the job ARN
pub fn job_id_from_arn(arn: &str) -> Option<&str> {
    let (_, id) = arn.rsplit_once('/')?;
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!(JobStatus::parse("Completed"), JobStatus::Completed);
        assert_eq!(JobStatus::parse("COMPLETED"), JobStatus::Completed);
        assert_eq!(JobStatus::parse("InProgress"), JobStatus::InProgress);
        assert_eq!(JobStatus::parse("in_progress"), JobStatus::InProgress);
        assert_eq!(JobStatus::parse("failed"), JobStatus::Failed);
        assert_eq!(JobStatus::parse("Stopped"), JobStatus::Stopped);
        assert_eq!(JobStatus::parse("Validating"), JobStatus::Other("Validating".to_string()));
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Stopped.is_terminal());
        assert!(!JobStatus::Submitted.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
        assert!(!JobStatus::parse("Stopping").is_terminal());
    }

    #[test]
    fn test_job_id_from_arn() {
        assert_eq!(
            job_id_from_arn("arn:aws:bedrock:us-west-2:123456789012:model-invocation-job/x1y2z3"),
            Some("x1y2z3")
        );
        assert_eq!(job_id_from_arn("no-slash-here"), None);
        assert_eq!(job_id_from_arn("arn:trailing/"), None);
    }
}
