//! Job processor module for running hearing-report classification units
//!
//! This module provides the per-unit pipeline:
//! - Discovering patient files in S3
//! - Preparing and uploading batch records
//! - Dispatching to a batch job or to direct model calls
//! - Extracting, projecting and writing results as CSV plus an error log

pub mod types;
pub mod core;


// Re-export main types and structs
pub use types::{
    JobConfig,
    RunSummary,
    UnitFailure,
    UnitOutcome,
    UnitReport
};

pub use self::core::{Collaborators, JobProcessor};
