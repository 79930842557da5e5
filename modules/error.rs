//! Error taxonomy for the batch pipeline
//!
//! Fatal-for-the-run errors (`ConfigError`) are raised before any record is
//! touched. Fatal-for-the-unit errors are collected under [`UnitError`] and
//! reported by the run loop, which then moves on to the next unit.
//! Per-record failures never surface here: they become error-log entries.

use thiserror::Error;

/// Institution configuration could not be loaded
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Config file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Institution '{0}' not found in config")]
    UnknownInstitution(String),

    #[error("No template found for institution '{0}'")]
    MissingTemplate(String),

    #[error("No processing guidelines found for institution '{0}'")]
    MissingRules(String),

    #[error("No csv_headers configured for institution '{0}'")]
    MissingHeaders(String),
}

/// Object store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Object not found: s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Bucket not found: {0}")]
    NoSuchBucket(String),

    #[error("Object store request failed: {0}")]
    Request(String),
}

/// Storage or identity preconditions for a batch job could not be met
#[derive(Error, Debug)]
pub enum ProvisioningError {
    #[error("Failed to create or verify bucket {bucket}: {reason}")]
    Bucket { bucket: String, reason: String },

    #[error("Permission probe failed on bucket {bucket}: {reason}")]
    Probe { bucket: String, reason: String },

    #[error("Failed to create or update role {role}: {reason}")]
    Role { role: String, reason: String },
}

/// The job-creation call failed
#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("Batch job creation failed: {0}")]
    Request(String),

    #[error("Job ARN has no job identifier: '{0}'")]
    MalformedArn(String),
}

/// The status poll loop ended without a terminal status
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Status query for job {job_id} failed: {reason}")]
    StatusQuery { job_id: String, reason: String },

    #[error("Job {job_id} still running after {attempts} status checks")]
    AttemptsExhausted { job_id: String, attempts: u32 },

    #[error("Monitoring of job {job_id} was cancelled")]
    Cancelled { job_id: String },
}

/// Every repair stage failed to recover a JSON object from model output
#[derive(Error, Debug, Clone, PartialEq)]
#[error("JSON decode failed: {reason}")]
pub struct ExtractionError {
    pub reason: String,
    /// The text handed to the extractor, kept for the error log
    pub original: String,
}

/// A unit's input file could not be turned into batch records
#[derive(Error, Debug)]
pub enum InputError {
    #[error("Input file {key} is not a JSON array of patients: {reason}")]
    MalformedPatients { key: String, reason: String },

    #[error("No valid patient data found in {0}")]
    NoRecords(String),
}

/// Anything that aborts a single batch unit
#[derive(Error, Debug)]
pub enum UnitError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error("Failed to encode batch records: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to write output file {path}: {source}")]
    Output {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A provider call (identity or job service) was rejected or failed in transport
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct ServiceError(pub String);

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
