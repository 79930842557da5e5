//! Hearing-report classification CLI
//!
//! ## Commands
//!
//! - `run`: classify every patient file under an input prefix, by batch job
//!   or direct model calls, and write one CSV plus error log per file
//! - `tabulate`: turn an already-downloaded `.jsonl.out` file into a CSV and
//!   error log

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};

use hearing_batch_lib::modules::cloud::aws::{
    load_cloud_context, BedrockJobOrchestrator, IamProvisioner, S3ObjectStore,
};
use hearing_batch_lib::modules::file_discovery::BATCH_OUTPUT_SUFFIX;
use hearing_batch_lib::modules::telemetry::init_tracing;
use hearing_batch_lib::{
    tabulate, BedrockModelRunner, Collaborators, InstitutionConfig, JobConfig, JobProcessor,
    RecordProjector, RunSummary, TableWriter, TokioWaiter, UnitOutcome,
};

#[derive(Parser)]
#[command(name = "hearing-batch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Classify hearing-test reports with Bedrock and tabulate the results", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every patient file under the input prefix
    Run(RunArgs),

    /// Convert a downloaded batch output file into a CSV and error log
    Tabulate {
        /// Path to the `.jsonl.out` file
        #[arg(long)]
        results: PathBuf,

        #[command(flatten)]
        institution: InstitutionArgs,

        /// Directory for the CSV and error log
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },
}

#[derive(Args)]
struct InstitutionArgs {
    /// Config file with institution templates
    #[arg(long, env = "HEARING_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Institution whose template and columns to use
    #[arg(long, env = "HEARING_INSTITUTION")]
    institution: String,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    institution: InstitutionArgs,

    /// Bucket holding inputs, batch files and job output
    #[arg(long, env = "HEARING_BUCKET")]
    bucket: String,

    /// Folder (ending in /) or single patient file to process
    #[arg(long, env = "HEARING_INPUT_PREFIX", default_value = "")]
    input_prefix: String,

    /// Prefix the batch job writes results under
    #[arg(long, default_value = "output/")]
    output_prefix: String,

    /// Prefix the prepared JSONL files are uploaded to
    #[arg(long, default_value = "input/")]
    batch_input_prefix: String,

    #[arg(long, env = "AWS_REGION", default_value = "us-west-2")]
    region: String,

    #[arg(long, env = "HEARING_MODEL_ID", default_value = "anthropic.claude-3-5-sonnet-20240620-v1:0")]
    model_id: String,

    #[arg(long, default_value = "4096")]
    max_tokens: u32,

    /// Local directory for CSVs and error logs
    #[arg(long, default_value = "batch_outputs")]
    output_dir: PathBuf,

    /// Seconds between job status checks
    #[arg(long, default_value = "30")]
    poll_interval_secs: u64,

    /// Seconds to wait after a role is created or updated
    #[arg(long, default_value = "50")]
    iam_propagation_secs: u64,

    /// Give up on a job after this many status checks (default: wait for as long as it runs)
    #[arg(long)]
    max_poll_attempts: Option<u32>,

    /// Smallest record count sent as a batch job
    #[arg(long, default_value = "100")]
    batch_threshold: usize,
}

impl RunArgs {
    fn job_config(&self) -> JobConfig {
        let mut config = JobConfig::new(
            &self.bucket,
            &self.institution.institution,
            &self.region,
            &self.model_id,
        );
        config.input_prefix = self.input_prefix.clone();
        config.output_prefix = self.output_prefix.clone();
        config.batch_input_prefix = self.batch_input_prefix.clone();
        config.max_tokens = self.max_tokens;
        config.output_dir = self.output_dir.clone();
        config.poll_interval_secs = self.poll_interval_secs;
        config.iam_propagation_secs = self.iam_propagation_secs;
        config.max_poll_attempts = self.max_poll_attempts;
        config.batch_threshold = self.batch_threshold;
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json, if cli.verbose { Level::DEBUG } else { Level::INFO });

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Tabulate {
            results,
            institution,
            output_dir,
        } => tabulate_file(&results, &institution, output_dir).await,
    }
}

fn load_institution(args: &InstitutionArgs) -> Result<Arc<InstitutionConfig>> {
    let config = InstitutionConfig::load(&args.config, &args.institution)
        .with_context(|| format!("Failed to load config for institution '{}'", args.institution))?;
    Ok(Arc::new(config))
}

async fn run(args: RunArgs) -> Result<()> {
    let institution = load_institution(&args.institution)?;
    let config = args.job_config();
    info!("Run configuration: {}", serde_json::to_string(&config)?);

    let (sdk_config, context) = load_cloud_context(&config.region).await?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling pending waits");
            let _ = cancel_tx.send(true);
        }
    });

    let collaborators = Collaborators {
        store: Arc::new(S3ObjectStore::new(aws_sdk_s3::Client::new(&sdk_config))),
        identity: Arc::new(IamProvisioner::new(aws_sdk_iam::Client::new(&sdk_config))),
        orchestrator: Arc::new(BedrockJobOrchestrator::new(
            aws_sdk_bedrock::Client::new(&sdk_config),
            context.clone(),
        )),
        invoker: Arc::new(BedrockModelRunner::new(Arc::new(
            aws_sdk_bedrockruntime::Client::new(&sdk_config),
        ))),
        waiter: Arc::new(TokioWaiter::cancellable(cancel_rx)),
        context,
    };

    let summary = JobProcessor::new(config, institution, collaborators)
        .run()
        .await
        .context("Run failed")?;
    report(&summary);

    if summary.completed.is_empty() {
        return Err(anyhow::anyhow!("All {} units failed", summary.failed.len()));
    }
    Ok(())
}

fn report(summary: &RunSummary) {
    for unit in &summary.completed {
        match &unit.outcome {
            UnitOutcome::Tabulated(files) => info!(
                "{}: {} rows written to {}, {} errors logged to {}",
                unit.input_key,
                files.rows,
                files.csv_path.display(),
                files.errors,
                files.error_log_path.display()
            ),
            UnitOutcome::JobFailed {
                job_id,
                status,
                message,
            } => warn!(
                "{}: job {} ended {}: {}",
                unit.input_key,
                job_id,
                status,
                message.as_deref().unwrap_or("no reason given")
            ),
            UnitOutcome::NoOutput { job_id } => {
                warn!("{}: job {} completed without a result file", unit.input_key, job_id)
            }
        }
    }
    for failure in &summary.failed {
        error!("{}: {}", failure.input_key, failure.error);
    }
}

async fn tabulate_file(results: &Path, args: &InstitutionArgs, output_dir: PathBuf) -> Result<()> {
    let institution = load_institution(args)?;
    let jsonl = tokio::fs::read_to_string(results)
        .await
        .with_context(|| format!("Failed to read {}", results.display()))?;

    let file_name = results
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = file_name
        .strip_suffix(BATCH_OUTPUT_SUFFIX)
        .unwrap_or(&file_name)
        .to_string();

    let projector = RecordProjector::new(&institution.csv_headers);
    let tabulation = tabulate(&jsonl, &projector);
    let files = TableWriter::new(output_dir, institution.csv_headers.clone())
        .write(&stem, &institution.institution, tabulation)
        .await?;

    info!(
        "CSV generated: {} ({} rows, {} errors)",
        files.csv_path.display(),
        files.rows,
        files.errors
    );
    Ok(())
}
