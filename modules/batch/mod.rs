//! Batch-job lifecycle: record preparation, dispatch, submission and monitoring

pub mod dispatch;
pub mod job;
pub mod monitor;
pub mod prompt;
pub mod records;
pub mod submission;
pub mod wait;

pub use dispatch::{DispatchMode, DispatchPolicy, BATCH_THRESHOLD};
pub use job::{JobDescriptor, JobStatus};
pub use monitor::{JobStatusMonitor, MonitorSettings};
pub use prompt::{extract_sections, PromptRenderer, UNKNOWN_SECTION};
pub use records::{parse_patient_file, record_id, BatchRecord, ModelInput, WireRecord};
pub use submission::BatchSubmissionCoordinator;
pub use wait::{TokioWaiter, Waiter};
#[cfg(any(test, feature = "test-util"))]
pub use wait::RecordingWaiter;
