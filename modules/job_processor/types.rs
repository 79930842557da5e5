//! Types and data structures for the job processor module

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::modules::batch::records::DEFAULT_MAX_TOKENS;
use crate::modules::batch::{DispatchMode, DispatchPolicy, JobStatus, MonitorSettings, BATCH_THRESHOLD};
use crate::modules::batch::monitor::DEFAULT_POLL_INTERVAL;
use crate::modules::batch::submission::DEFAULT_IAM_PROPAGATION;
use crate::modules::output::TableFiles;

pub const DEFAULT_ROLE_PREFIX: &str = "pediatric-aud-batch";
pub const DEFAULT_JOB_PREFIX: &str = "pediatric-aud-batch";

/// Configuration for a processing run
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct JobConfig {
    pub bucket: String,
    pub input_prefix: String, // Folder (ending with /) or a single patient file
    pub output_prefix: String,
    pub batch_input_prefix: String,
    pub institution: String,
    pub region: String,
    pub model_id: String,
    pub max_tokens: u32,
    pub output_dir: PathBuf,
    pub poll_interval_secs: u64,
    pub iam_propagation_secs: u64,
    pub max_poll_attempts: Option<u32>,
    pub batch_threshold: usize,
    pub role_name_prefix: String,
    pub job_name_prefix: String,
}

impl JobConfig {
    /// Config with every tunable at its default
    pub fn new(bucket: &str, institution: &str, region: &str, model_id: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            input_prefix: String::new(),
            output_prefix: "output/".to_string(),
            batch_input_prefix: "input/".to_string(),
            institution: institution.to_string(),
            region: region.to_string(),
            model_id: model_id.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            output_dir: PathBuf::from("batch_outputs"),
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            iam_propagation_secs: DEFAULT_IAM_PROPAGATION.as_secs(),
            max_poll_attempts: None,
            batch_threshold: BATCH_THRESHOLD,
            role_name_prefix: DEFAULT_ROLE_PREFIX.to_string(),
            job_name_prefix: DEFAULT_JOB_PREFIX.to_string(),
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            max_attempts: self.max_poll_attempts,
        }
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy::with_threshold(self.batch_threshold)
    }

    pub fn iam_propagation(&self) -> Duration {
        Duration::from_secs(self.iam_propagation_secs)
    }
}

/// How a unit ended when nothing aborted it
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    /// Table and error log were written
    Tabulated(TableFiles),
    /// The batch job ended FAILED or STOPPED; no rows
    JobFailed {
        job_id: String,
        status: JobStatus,
        message: Option<String>,
    },
    /// The job completed but left no result file
    NoOutput { job_id: String },
}

/// Result of processing one input file
#[derive(Debug, Clone, PartialEq)]
pub struct UnitReport {
    pub input_key: String,
    pub records: usize,
    pub mode: DispatchMode,
    pub outcome: UnitOutcome,
}

/// A unit that was aborted by a fatal error
#[derive(Debug, Clone, PartialEq)]
pub struct UnitFailure {
    pub input_key: String,
    pub error: String,
}

/// Everything a run did, unit by unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub completed: Vec<UnitReport>,
    pub failed: Vec<UnitFailure>,
}

impl RunSummary {
    pub fn total_rows(&self) -> usize {
        self.tables().map(|files| files.rows).sum()
    }

    pub fn total_errors(&self) -> usize {
        self.tables().map(|files| files.errors).sum()
    }

    fn tables(&self) -> impl Iterator<Item = &TableFiles> {
        self.completed.iter().filter_map(|unit| match &unit.outcome {
            UnitOutcome::Tabulated(files) => Some(files),
            _ => None,
        })
    }
}
