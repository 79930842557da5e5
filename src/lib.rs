//! # Hearing Batch Library
//!
//! Classifies unstructured hearing-test reports with a Bedrock-hosted model
//! and writes the results as institution-specific CSV tables:
//! - Patient files are turned into batch records and dispatched either to an
//!   asynchronous batch job or to direct model calls, by volume
//! - Batch jobs are provisioned, submitted and monitored through capability
//!   traits with AWS adapters
//! - Model output is recovered by a staged repair chain and projected onto the
//!   institution's columns, with an error log for records that fail
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use hearing_batch_lib::{InstitutionConfig, RecordProjector, TableWriter};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let institution = Arc::new(InstitutionConfig::load("config.json", "Redcap")?);
//!     let results = std::fs::read_to_string("results.jsonl.out")?;
//!
//!     let projector = RecordProjector::new(&institution.csv_headers);
//!     let tabulation = hearing_batch_lib::tabulate(&results, &projector);
//!
//!     let writer = TableWriter::new("out", institution.csv_headers.clone());
//!     let files = writer.write("results", &institution.institution, tabulation).await?;
//!     println!("Wrote {} rows to {}", files.rows, files.csv_path.display());
//!     Ok(())
//! }
//! ```

// Include the modules from the modules directory
#[path = "../modules/mod.rs"]
pub mod modules;

// Re-export everything from modules for easy access
pub use modules::*;

// Re-export commonly used external types for convenience
pub use anyhow::{Context, Result};
pub use serde::{Deserialize, Serialize};
pub use tokio;
pub use tracing;

/// Version information for the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
