//! Polls a submitted job until it reaches a terminal status

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::job::{JobDescriptor, JobStatus};
use super::wait::Waiter;
use crate::modules::cloud::JobOrchestrator;
use crate::modules::error::MonitorError;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    /// `None` waits as long as the job runs
    pub max_attempts: Option<u32>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: None,
        }
    }
}

pub struct JobStatusMonitor {
    orchestrator: Arc<dyn JobOrchestrator>,
    waiter: Arc<dyn Waiter>,
    settings: MonitorSettings,
}

impl JobStatusMonitor {
    pub fn new(orchestrator: Arc<dyn JobOrchestrator>, waiter: Arc<dyn Waiter>, settings: MonitorSettings) -> Self {
        Self {
            orchestrator,
            waiter,
            settings,
        }
    }

    /// Polls until `job` is COMPLETED, FAILED or STOPPED and returns that status
    ///
    /// A failed or stopped job is a normal return, not an error; the
    /// provider's message is kept on the descriptor.
    pub async fn wait_for_terminal(&self, job: &mut JobDescriptor) -> Result<JobStatus, MonitorError> {
        info!("Monitoring job status for job ID: {}", job.job_id);
        let mut attempts: u32 = 0;

        loop {
            let state = self
                .orchestrator
                .get_job(&job.job_id)
                .await
                .map_err(|e| MonitorError::StatusQuery {
                    job_id: job.job_id.clone(),
                    reason: e.to_string(),
                })?;
            attempts += 1;

            let status = JobStatus::parse(&state.status);
            info!("Job {} status: {}", job.job_id, status);
            job.record_status(status.clone(), state.message);

            match &status {
                JobStatus::Failed => {
                    error!(
                        "Job {} failed with reason: {}",
                        job.job_id,
                        job.failure_message().unwrap_or("No failure reason provided")
                    );
                    return Ok(status);
                }
                JobStatus::Stopped => {
                    warn!(
                        "Job {} was stopped: {}",
                        job.job_id,
                        job.failure_message().unwrap_or("No reason provided")
                    );
                    return Ok(status);
                }
                JobStatus::Completed => return Ok(status),
                _ => {}
            }

            if let Some(max_attempts) = self.settings.max_attempts {
                if attempts >= max_attempts {
                    return Err(MonitorError::AttemptsExhausted {
                        job_id: job.job_id.clone(),
                        attempts,
                    });
                }
            }

            if !self.waiter.wait(self.settings.poll_interval).await {
                return Err(MonitorError::Cancelled {
                    job_id: job.job_id.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::batch::wait::RecordingWaiter;
    use crate::modules::cloud::fakes::MemoryJobOrchestrator;
    use crate::modules::cloud::JobState;

    fn job() -> JobDescriptor {
        JobDescriptor::submitted(
            "job0001".to_string(),
            "aud-batch-1".to_string(),
            "s3://b/input/a.jsonl".to_string(),
            "s3://b/output/".to_string(),
            "arn:aws:iam::1:role/r".to_string(),
        )
    }

    fn monitor(
        orchestrator: Arc<MemoryJobOrchestrator>,
        waiter: Arc<RecordingWaiter>,
        max_attempts: Option<u32>,
    ) -> JobStatusMonitor {
        JobStatusMonitor::new(
            orchestrator,
            waiter,
            MonitorSettings {
                max_attempts,
                ..MonitorSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn test_polls_at_fixed_interval_until_completed() {
        let orchestrator = Arc::new(MemoryJobOrchestrator::new("us-west-2", "1"));
        orchestrator.script_statuses(&["Submitted", "InProgress", "InProgress", "Completed"]);
        let waiter = Arc::new(RecordingWaiter::new());

        let mut job = job();
        let status = monitor(orchestrator.clone(), waiter.clone(), None)
            .wait_for_terminal(&mut job)
            .await
            .unwrap();

        assert_eq!(status, JobStatus::Completed);
        assert_eq!(job.status(), &JobStatus::Completed);
        assert_eq!(orchestrator.polls().len(), 4);
        assert_eq!(waiter.waits(), vec![Duration::from_secs(30); 3]);
    }

    #[tokio::test]
    async fn test_failed_job_is_returned_not_raised() {
        let orchestrator = Arc::new(MemoryJobOrchestrator::new("us-west-2", "1"));
        orchestrator.script_states(vec![
            JobState {
                status: "InProgress".to_string(),
                message: None,
            },
            JobState {
                status: "Failed".to_string(),
                message: Some("Input file has fewer than 100 records".to_string()),
            },
        ]);
        let waiter = Arc::new(RecordingWaiter::new());

        let mut job = job();
        let status = monitor(orchestrator, waiter, None)
            .wait_for_terminal(&mut job)
            .await
            .unwrap();

        assert_eq!(status, JobStatus::Failed);
        assert_eq!(job.failure_message(), Some("Input file has fewer than 100 records"));
    }

    #[tokio::test]
    async fn test_stopped_is_terminal() {
        let orchestrator = Arc::new(MemoryJobOrchestrator::new("us-west-2", "1"));
        orchestrator.script_statuses(&["Stopping", "Stopped"]);
        let mut job = job();
        let status = monitor(orchestrator, Arc::new(RecordingWaiter::new()), None)
            .wait_for_terminal(&mut job)
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Stopped);
    }

    #[tokio::test]
    async fn test_attempt_bound() {
        let orchestrator = Arc::new(MemoryJobOrchestrator::new("us-west-2", "1"));
        orchestrator.script_statuses(&["InProgress"]);
        let waiter = Arc::new(RecordingWaiter::new());

        let mut job = job();
        let err = monitor(orchestrator.clone(), waiter.clone(), Some(5))
            .wait_for_terminal(&mut job)
            .await
            .unwrap_err();

        assert!(matches!(err, MonitorError::AttemptsExhausted { attempts: 5, .. }));
        assert_eq!(orchestrator.polls().len(), 5);
        assert_eq!(waiter.waits().len(), 4);
        assert_eq!(job.status(), &JobStatus::InProgress);
    }

    #[tokio::test]
    async fn test_cancellation_stops_polling() {
        let orchestrator = Arc::new(MemoryJobOrchestrator::new("us-west-2", "1"));
        orchestrator.script_statuses(&["InProgress"]);
        let waiter = Arc::new(RecordingWaiter::cancel_after(2));

        let mut job = job();
        let err = monitor(orchestrator.clone(), waiter, None)
            .wait_for_terminal(&mut job)
            .await
            .unwrap_err();

        assert!(matches!(err, MonitorError::Cancelled { .. }));
        assert_eq!(orchestrator.polls().len(), 3);
    }

    #[tokio::test]
    async fn test_status_query_failure_propagates() {
        let orchestrator = Arc::new(MemoryJobOrchestrator::new("us-west-2", "1"));
        let mut job = job();
        let err = monitor(orchestrator, Arc::new(RecordingWaiter::new()), None)
            .wait_for_terminal(&mut job)
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::StatusQuery { .. }));
    }
}
