//! Run reporter
//!
//! Streams every outcome into three append-only logs under the logs
//! directory, flushing after each write:
//! - `success.log`: file and accepted row count
//! - `error.log`: file and failure reason
//! - `stats.csv`: file, success, rows, size (MB), memory delta (MB)
//!
//! It also drives the live progress line and the run metrics.

use crate::models::{InsertOutcome, RunStatistics};
use crate::observability::{IngestMetrics, StructuredLogger};
use crate::pipeline::OutcomeSink;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const SUCCESS_LOG: &str = "success.log";
pub const ERROR_LOG: &str = "error.log";
pub const STATS_LOG: &str = "stats.csv";

const PROGRESS_TICK: Duration = Duration::from_millis(100);

const STATS_HEADER: [&str; 5] = ["file", "success", "rows", "size_mb", "memory_delta_mb"];

#[derive(Debug, Clone)]
pub struct ReporterConfig {
    pub logs_dir: PathBuf,
    /// Draw the live progress line on stderr
    pub show_progress: bool,
    /// Tag attached to structured log events
    pub run_id: String,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("import_logs"),
            show_progress: true,
            run_id: String::from("ingest"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write statistics log: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Serialize)]
struct StatsRow<'a> {
    file: &'a str,
    success: bool,
    rows: u64,
    size_mb: String,
    memory_delta_mb: String,
}

/// [`OutcomeSink`] that persists outcomes and shows live progress
pub struct RunReporter {
    success_log: File,
    error_log: File,
    stats_log: csv::Writer<File>,
    progress: ProgressBar,
    metrics: IngestMetrics,
    logger: StructuredLogger,
    summary: Option<RunSummary>,
}

impl RunReporter {
    /// Create the logs directory and open the three logs for appending
    pub fn create(config: &ReporterConfig) -> Result<Self, ReporterError> {
        std::fs::create_dir_all(&config.logs_dir).map_err(|source| ReporterError::Io {
            path: config.logs_dir.clone(),
            source,
        })?;

        let success_log = open_append(&config.logs_dir.join(SUCCESS_LOG))?;
        let error_log = open_append(&config.logs_dir.join(ERROR_LOG))?;

        let stats_path = config.logs_dir.join(STATS_LOG);
        let stats_file = open_append(&stats_path)?;
        let needs_header = stats_file
            .metadata()
            .map(|m| m.len() == 0)
            .map_err(|source| ReporterError::Io {
                path: stats_path.clone(),
                source,
            })?;
        let mut stats_log = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(stats_file);
        if needs_header {
            stats_log.write_record(STATS_HEADER)?;
            stats_log.flush().map_err(|source| ReporterError::Io {
                path: stats_path,
                source,
            })?;
        }

        let progress = progress_bar(config.show_progress);

        Ok(Self {
            success_log,
            error_log,
            stats_log,
            progress,
            metrics: IngestMetrics::new(),
            logger: StructuredLogger::new(config.run_id.clone()),
            summary: None,
        })
    }

    /// Final summary, available once the run has completed
    pub fn summary(&self) -> Option<&RunSummary> {
        self.summary.as_ref()
    }

    fn write_logs(&mut self, outcome: &InsertOutcome) -> Result<(), ReporterError> {
        let file = outcome.path.display().to_string();

        if outcome.success {
            writeln!(
                self.success_log,
                "{} imported successfully, rows={}",
                file, outcome.rows
            )
            .and_then(|_| self.success_log.flush())
            .map_err(|source| ReporterError::Io {
                path: PathBuf::from(SUCCESS_LOG),
                source,
            })?;
        } else {
            writeln!(
                self.error_log,
                "Error importing {}: {}",
                file,
                outcome.error.as_deref().unwrap_or("unknown error")
            )
            .and_then(|_| self.error_log.flush())
            .map_err(|source| ReporterError::Io {
                path: PathBuf::from(ERROR_LOG),
                source,
            })?;
        }

        self.stats_log.serialize(StatsRow {
            file: &file,
            success: outcome.success,
            rows: outcome.rows,
            size_mb: format!("{:.2}", outcome.size_mb()),
            memory_delta_mb: format!("{:.2}", outcome.memory_delta_mb()),
        })?;
        self.stats_log.flush().map_err(|source| ReporterError::Io {
            path: PathBuf::from(STATS_LOG),
            source,
        })?;
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File, ReporterError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| ReporterError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Live progress line; ticks on its own so elapsed time moves during
/// cooldowns and slow super-batches
fn progress_bar(show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} files | {msg}")
            .expect("Invalid progress bar template")
            .progress_chars("#>-"),
    );
    pb.enable_steady_tick(PROGRESS_TICK);
    pb
}

fn progress_message(stats: &RunStatistics) -> String {
    format!(
        "{:.1} files/s | {:.0} rows/s | ok {} | failed {}",
        stats.files_per_second(),
        stats.rows_per_second(),
        stats.succeeded,
        stats.failed
    )
}

impl OutcomeSink for RunReporter {
    fn on_run_start(&mut self, total_files: usize, super_batches: usize) {
        self.progress.set_length(total_files as u64);
        self.logger.log_run_started(total_files, super_batches);
    }

    fn on_super_batch_start(&mut self, index: usize, total: usize, files: usize) {
        self.metrics.set_active_super_batch(index);
        self.progress.suspend(|| {
            self.logger.log_super_batch_started(index, total, files);
        });
    }

    fn on_cooldown(&mut self, index: usize, cooldown: Duration) {
        self.progress.suspend(|| self.logger.log_cooldown(index, cooldown));
        self.progress
            .set_message(format!("cooling down {}s", cooldown.as_secs()));
    }

    fn on_outcome(&mut self, outcome: &InsertOutcome, stats: &RunStatistics) {
        if let Err(e) = self.write_logs(outcome) {
            warn!(path = %outcome.path.display(), error = %e, "Failed to persist outcome");
        }
        if !outcome.success {
            self.progress.suspend(|| self.logger.log_file_failed(outcome));
        }
        self.metrics.observe_outcome(outcome);
        self.progress.inc(1);
        self.progress.set_message(progress_message(stats));
    }

    fn on_run_complete(&mut self, stats: &RunStatistics) {
        self.progress.finish_and_clear();
        self.logger.log_run_completed(stats);
        self.summary = Some(RunSummary::from(stats));
    }
}

/// End-of-run totals
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total_files: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_rows: u64,
    pub elapsed_secs: f64,
    pub files_per_second: f64,
    pub rows_per_second: f64,
    pub interrupted: bool,
}

impl From<&RunStatistics> for RunSummary {
    fn from(stats: &RunStatistics) -> Self {
        Self {
            total_files: stats.total_files,
            processed: stats.processed,
            succeeded: stats.succeeded,
            failed: stats.failed,
            total_rows: stats.total_rows,
            elapsed_secs: stats.elapsed().as_secs_f64(),
            files_per_second: stats.files_per_second(),
            rows_per_second: stats.rows_per_second(),
            interrupted: stats.interrupted,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.interrupted {
            writeln!(f, "Import interrupted!")?;
        } else {
            writeln!(f, "Import completed!")?;
        }
        writeln!(f, "Total files: {}", self.total_files)?;
        writeln!(f, "Processed: {}", self.processed)?;
        writeln!(f, "Succeeded: {}", self.succeeded)?;
        writeln!(f, "Failed: {}", self.failed)?;
        writeln!(f, "Total rows: {}", self.total_rows)?;
        writeln!(f, "Elapsed: {:.2}s", self.elapsed_secs)?;
        write!(
            f,
            "Average throughput: {:.2} files/s, {:.2} rows/s",
            self.files_per_second, self.rows_per_second
        )
    }
}
