//! Core job processing logic

use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use super::types::{JobConfig, RunSummary, UnitFailure, UnitOutcome, UnitReport};
use crate::modules::batch::records::{parse_patient_file, to_jsonl, BatchRecord, WireRecordError};
use crate::modules::batch::{
    BatchSubmissionCoordinator, DispatchMode, DispatchPolicy, JobStatus, JobStatusMonitor, Waiter,
};
use crate::modules::cloud::{CloudContext, IdentityProvisioner, JobOrchestrator, ObjectStore};
use crate::modules::error::UnitError;
use crate::modules::file_discovery::{FileDiscovery, PATIENT_FILE_SUFFIX};
use crate::modules::institution_config::InstitutionConfig;
use crate::modules::model_runner::ModelInvoker;
use crate::modules::output::{tabulate, RecordProjector, TableWriter};

/// Everything the processor talks to outside the process
pub struct Collaborators {
    pub store: Arc<dyn ObjectStore>,
    pub identity: Arc<dyn IdentityProvisioner>,
    pub orchestrator: Arc<dyn JobOrchestrator>,
    pub invoker: Arc<dyn ModelInvoker>,
    pub waiter: Arc<dyn Waiter>,
    pub context: CloudContext,
}

/// Runs every input file through preparation, dispatch, extraction and tabulation
///
/// Units are processed one after another. A unit that hits a fatal error is
/// reported and skipped; the run carries on with the next one.
pub struct JobProcessor {
    config: JobConfig,
    institution: Arc<InstitutionConfig>,
    store: Arc<dyn ObjectStore>,
    invoker: Arc<dyn ModelInvoker>,
    discovery: FileDiscovery,
    coordinator: BatchSubmissionCoordinator,
    monitor: JobStatusMonitor,
    policy: DispatchPolicy,
    projector: RecordProjector,
    writer: TableWriter,
}

impl JobProcessor {
    pub fn new(config: JobConfig, institution: Arc<InstitutionConfig>, collaborators: Collaborators) -> Self {
        let Collaborators {
            store,
            identity,
            orchestrator,
            invoker,
            waiter,
            context,
        } = collaborators;

        let coordinator = BatchSubmissionCoordinator::new(
            store.clone(),
            identity,
            orchestrator.clone(),
            waiter.clone(),
            context,
            config.model_id.clone(),
        )
        .with_iam_propagation(config.iam_propagation());

        Self {
            discovery: FileDiscovery::new(store.clone(), config.bucket.clone()),
            monitor: JobStatusMonitor::new(orchestrator, waiter, config.monitor_settings()),
            policy: config.dispatch_policy(),
            projector: RecordProjector::new(&institution.csv_headers),
            writer: TableWriter::new(config.output_dir.clone(), institution.csv_headers.clone()),
            coordinator,
            store,
            invoker,
            institution,
            config,
        }
    }

    // === Main Execution ===
    /// Processes every patient file under the configured input prefix
    pub async fn run(&self) -> Result<RunSummary> {
        let start_time = Instant::now();
        info!(
            "Starting run for institution {} over s3://{}/{}",
            self.config.institution, self.config.bucket, self.config.input_prefix
        );

        let files = self
            .discovery
            .discover_inputs(&self.config.input_prefix)
            .await
            .context("Failed during file discovery phase")?;
        if files.is_empty() {
            return Err(anyhow::anyhow!(
                "No patient files found in s3://{}/{}",
                self.config.bucket,
                self.config.input_prefix
            ));
        }

        let mut summary = RunSummary::default();
        for (i, file) in files.iter().enumerate() {
            info!("Processing unit {}/{}: {}", i + 1, files.len(), file.key);
            match self.process_unit(&file.key).await {
                Ok(report) => summary.completed.push(report),
                Err(e) => {
                    error!("Unit {} aborted: {}", file.key, e);
                    summary.failed.push(UnitFailure {
                        input_key: file.key.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Run finished in {:?}: {} units completed, {} failed, {} rows, {} record errors",
            start_time.elapsed(),
            summary.completed.len(),
            summary.failed.len(),
            summary.total_rows(),
            summary.total_errors()
        );
        Ok(summary)
    }

    // === Unit Processing ===
    /// Prepares one patient file, dispatches it and writes its table
    pub async fn process_unit(&self, input_key: &str) -> Result<UnitReport, UnitError> {
        let data = self.store.get(&self.config.bucket, input_key).await?;
        let mut records = parse_patient_file(input_key, &data, &self.institution)?;
        let stem = unit_stem(input_key);

        let batch_key = format!(
            "{}{}_{}_batch.jsonl",
            self.config.batch_input_prefix,
            stem,
            self.config.institution.to_lowercase()
        );
        let jsonl = to_jsonl(&records, self.config.max_tokens)?;
        info!("Uploading {} bytes to s3://{}/{}", jsonl.len(), self.config.bucket, batch_key);
        self.store
            .put(&self.config.bucket, &batch_key, Bytes::from(jsonl), "application/json")
            .await?;

        let mode = self.policy.select(records.len());
        info!("Unit {} has {} records, dispatching as {:?}", input_key, records.len(), mode);

        let outcome = match mode {
            DispatchMode::Batch => self.run_batch(&stem, &batch_key).await?,
            DispatchMode::Interactive => self.run_interactive(&stem, &mut records).await?,
        };

        Ok(UnitReport {
            input_key: input_key.to_string(),
            records: records.len(),
            mode,
            outcome,
        })
    }

    // === Batch Path ===
    async fn run_batch(&self, stem: &str, batch_key: &str) -> Result<UnitOutcome, UnitError> {
        let bucket = &self.config.bucket;
        self.coordinator.ensure_preconditions(bucket).await?;

        let timestamp = Utc::now().timestamp();
        let role_name = format!("{}-{}", self.config.role_name_prefix, timestamp);
        let job_name = format!("{}-{}", self.config.job_name_prefix, timestamp);
        let role_arn = self.coordinator.ensure_role(&role_name, bucket).await?;

        let input_uri = format!("s3://{}/{}", bucket, batch_key);
        let output_uri = format!("s3://{}/{}", bucket, self.config.output_prefix);
        let mut job = self
            .coordinator
            .submit(&job_name, &input_uri, &output_uri, &role_arn)
            .await?;

        let status = self.monitor.wait_for_terminal(&mut job).await?;
        if status != JobStatus::Completed {
            return Ok(UnitOutcome::JobFailed {
                job_id: job.job_id.clone(),
                status,
                message: job.failure_message().map(str::to_string),
            });
        }

        let results_prefix = format!("{}{}/", self.config.output_prefix, job.job_id);
        let Some(result_key) = self.discovery.locate_latest_output(&results_prefix).await? else {
            return Ok(UnitOutcome::NoOutput { job_id: job.job_id });
        };

        let body = self.store.get(bucket, &result_key).await?;
        info!("Downloaded {} bytes of results from s3://{}/{}", body.len(), bucket, result_key);
        self.tabulate_and_write(stem, &String::from_utf8_lossy(&body)).await
    }

    // === Interactive Path ===
    async fn run_interactive(&self, stem: &str, records: &mut [BatchRecord]) -> Result<UnitOutcome, UnitError> {
        info!("Processing {} records individually", records.len());
        let mut lines = String::new();

        for record in records.iter_mut() {
            let result = self
                .invoker
                .invoke(&self.config.model_id, &record.model_input.rendered_prompt, self.config.max_tokens)
                .await;

            let wire = match result {
                Ok(response) => {
                    record.model_output = Some(response.text);
                    record.to_wire(self.config.max_tokens)
                }
                Err(e) => {
                    warn!("Model invocation failed for {}: {}", record.record_id, e);
                    let mut wire = record.to_wire(self.config.max_tokens);
                    wire.error = Some(WireRecordError {
                        error_code: None,
                        error_message: Some(e.to_string()),
                    });
                    wire
                }
            };
            lines.push_str(&serde_json::to_string(&wire)?);
            lines.push('\n');
        }

        self.tabulate_and_write(stem, &lines).await
    }

    async fn tabulate_and_write(&self, stem: &str, jsonl: &str) -> Result<UnitOutcome, UnitError> {
        let tabulation = tabulate(jsonl, &self.projector);
        let files = self
            .writer
            .write(stem, &self.institution.institution, tabulation)
            .await?;
        Ok(UnitOutcome::Tabulated(files))
    }
}

/// File name of `key` without its directory and `.json` suffix
pub fn unit_stem(key: &str) -> String {
    let name = key.rsplit('/').next().unwrap_or(key);
    name.strip_suffix(PATIENT_FILE_SUFFIX).unwrap_or(name).to_string()
}
