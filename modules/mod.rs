//! Library for hearing-report batch classification
//!
//! This library provides modules for:
//! - Institution configuration and the error taxonomy
//! - Cloud capabilities (storage, identity, batch jobs) with AWS adapters and fakes
//! - Batch record preparation, dispatch, submission and monitoring
//! - Model runner for interactive Bedrock calls
//! - Response extraction and tabular output
//! - Job processor for orchestrating the entire workflow

pub mod batch;
pub mod cloud;
pub mod error;
pub mod extraction;
pub mod file_discovery;
pub mod institution_config;
pub mod job_processor;
pub mod model_runner;
pub mod output;
pub mod telemetry;

// Re-export commonly used types and structs
pub use batch::{DispatchMode, DispatchPolicy, JobDescriptor, JobStatus, MonitorSettings, TokioWaiter};
pub use error::{ConfigError, ExtractionError, UnitError};
pub use extraction::ResponseExtractor;
pub use file_discovery::FileDiscovery;
pub use institution_config::InstitutionConfig;
pub use job_processor::{Collaborators, JobConfig, JobProcessor, RunSummary, UnitOutcome};
pub use model_runner::{BedrockModelRunner, ModelInvoker};
pub use output::{tabulate, RecordProjector, TableWriter};
