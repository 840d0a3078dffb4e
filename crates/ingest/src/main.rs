//! metrics-ingest - bulk loader for API metric exports
//!
//! Ensures the `api_metrics` table exists, finds export files under the input
//! root, asks for confirmation and loads them into ClickHouse.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use ingest_lib::input::discover;
use ingest_lib::observability::IngestMetrics;
use ingest_lib::pipeline::{ensure_schema, CoordinatorBuilder};
use ingest_lib::reporter::RunReporter;
use ingest_lib::store::{ClickHouseFactory, ConnectionFactory};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

use config::{LoaderConfig, Overrides};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Bulk loader for API metric CSV exports
#[derive(Parser)]
#[command(name = "metrics-ingest")]
#[command(author, version, about = "Load API metric CSV exports into ClickHouse", long_about = None)]
struct Cli {
    /// Directory scanned recursively for export files
    #[arg(value_name = "INPUT_ROOT")]
    input_root: Option<PathBuf>,

    /// Configuration file (optional)
    #[arg(long, short, env = "INGEST_CONFIG", default_value = "ingest.toml")]
    config: PathBuf,

    /// ClickHouse HTTP endpoint
    #[arg(long)]
    endpoint: Option<String>,

    /// ClickHouse user
    #[arg(long)]
    user: Option<String>,

    /// ClickHouse password
    #[arg(long)]
    password: Option<String>,

    /// ClickHouse database
    #[arg(long)]
    database: Option<String>,

    /// File name suffix to import
    #[arg(long)]
    suffix: Option<String>,

    /// Concurrent workers (max 16)
    #[arg(long, short)]
    workers: Option<usize>,

    /// Files per super-batch
    #[arg(long)]
    super_batch_size: Option<usize>,

    /// Rows per sub-batch after a failed bulk insert
    #[arg(long)]
    sub_batch_size: Option<usize>,

    /// Seconds to pause between super-batches
    #[arg(long)]
    cooldown_secs: Option<u64>,

    /// Insert attempts per file
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Linear backoff unit in seconds
    #[arg(long)]
    retry_base_delay_secs: Option<u64>,

    /// Directory for success/error/stats logs
    #[arg(long)]
    logs_dir: Option<PathBuf>,

    /// Write Prometheus metrics to this file when the run ends
    #[arg(long)]
    metrics_textfile: Option<PathBuf>,

    /// Do not ask for confirmation
    #[arg(long, short)]
    yes: bool,

    /// Exit with status 2 if any file failed
    #[arg(long)]
    strict: bool,

    /// Hide the live progress bar
    #[arg(long)]
    no_progress: bool,

    /// Log output format
    #[arg(long, env = "INGEST_LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            input_root: self.input_root.clone(),
            endpoint: self.endpoint.clone(),
            username: self.user.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            file_suffix: self.suffix.clone(),
            workers: self.workers,
            super_batch_size: self.super_batch_size,
            sub_batch_size: self.sub_batch_size,
            cooldown_secs: self.cooldown_secs,
            max_attempts: self.max_attempts,
            retry_base_delay_secs: self.retry_base_delay_secs,
            logs_dir: self.logs_dir.clone(),
            metrics_textfile: self.metrics_textfile.clone(),
            assume_yes: self.yes,
            strict_exit: self.strict,
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_writer(std::io::stderr)).init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
    }
}

/// Ask once on `output`; only `y` or `yes` (any case) proceeds
fn confirm(mut input: impl BufRead, mut output: impl Write) -> std::io::Result<bool> {
    write!(output, "Do you want to proceed with the import? (y/n): ")?;
    output.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = LoaderConfig::load(&cli.config, cli.overrides())?;
    info!(
        endpoint = %config.store.endpoint,
        input_root = %config.input_root.display(),
        workers = config.workers,
        "Loader configured"
    );

    config.prepare_logs_dir()?;

    let factory: Arc<dyn ConnectionFactory> =
        Arc::new(ClickHouseFactory::new(config.store_config()));
    ensure_schema(factory.as_ref())
        .await
        .context("Could not prepare the api_metrics table")?;

    let files = discover(&config.input_root, &config.file_suffix)
        .with_context(|| format!("Could not scan {}", config.input_root.display()))?;
    if files.is_empty() {
        println!("No CSV files found!");
        return Ok(ExitCode::SUCCESS);
    }
    println!("Found {} CSV files to import", files.len());

    let proceed = if config.assume_yes {
        true
    } else {
        tokio::task::spawn_blocking(|| confirm(std::io::stdin().lock(), std::io::stdout()))
            .await
            .context("Confirmation prompt failed")??
    };
    if !proceed {
        println!("Import cancelled by user");
        return Ok(ExitCode::SUCCESS);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight files");
            let _ = shutdown_tx.send(true);
        }
    });

    let coordinator = CoordinatorBuilder::new()
        .factory(factory)
        .pool_config(config.pool_config())
        .insert_policy(config.insert_policy())
        .shutdown(shutdown_rx)
        .build()?;

    let run_id = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
    let mut reporter = RunReporter::create(&config.reporter_config(!cli.no_progress, run_id))
        .context("Could not open the import logs")?;

    let stats = coordinator.run(files, true, &mut reporter).await?;

    if let Some(summary) = reporter.summary() {
        println!("{}", summary);
    }

    if let Some(path) = &config.metrics_textfile {
        if let Err(e) = IngestMetrics::new().write_textfile(path) {
            warn!(path = %path.display(), error = %e, "Failed to write metrics textfile");
        }
    }

    if config.strict_exit && stats.failed > 0 {
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}
