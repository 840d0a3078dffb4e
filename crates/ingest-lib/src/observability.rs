//! Observability for ingestion runs
//!
//! Provides:
//! - Prometheus metrics (files, rows, retries, file latency, active super-batch)
//! - Structured logging of run-level events with tracing

use crate::models::{InsertOutcome, RunStatistics};
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Encoder, Histogram, IntCounter,
    IntGauge, TextEncoder,
};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Histogram buckets for per-file processing time (in seconds)
const FILE_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<IngestMetricsInner> = OnceLock::new();

struct IngestMetricsInner {
    files_processed: IntCounter,
    files_succeeded: IntCounter,
    files_failed: IntCounter,
    rows_inserted: IntCounter,
    rows_skipped: IntCounter,
    insert_retries: IntCounter,
    file_latency_seconds: Histogram,
    active_super_batch: IntGauge,
}

impl IngestMetricsInner {
    fn new() -> Self {
        Self {
            files_processed: register_int_counter!(
                "metrics_ingest_files_processed_total",
                "Files that reached a terminal state"
            )
            .expect("Failed to register files_processed"),

            files_succeeded: register_int_counter!(
                "metrics_ingest_files_succeeded_total",
                "Files loaded completely"
            )
            .expect("Failed to register files_succeeded"),

            files_failed: register_int_counter!(
                "metrics_ingest_files_failed_total",
                "Files that failed to parse or insert"
            )
            .expect("Failed to register files_failed"),

            rows_inserted: register_int_counter!(
                "metrics_ingest_rows_inserted_total",
                "Rows acknowledged by the store"
            )
            .expect("Failed to register rows_inserted"),

            rows_skipped: register_int_counter!(
                "metrics_ingest_rows_skipped_total",
                "Rows dropped by validation"
            )
            .expect("Failed to register rows_skipped"),

            insert_retries: register_int_counter!(
                "metrics_ingest_insert_retries_total",
                "Insert attempts beyond the first, each on a rebuilt connection"
            )
            .expect("Failed to register insert_retries"),

            file_latency_seconds: register_histogram!(
                "metrics_ingest_file_latency_seconds",
                "Time spent parsing and inserting one file",
                FILE_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register file_latency_seconds"),

            active_super_batch: register_int_gauge!(
                "metrics_ingest_active_super_batch",
                "Zero-based index of the super-batch being processed"
            )
            .expect("Failed to register active_super_batch"),
        }
    }
}

/// Handle to the process-wide ingestion metrics.
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct IngestMetrics {
    _private: (),
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(IngestMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &IngestMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Fold one file outcome into the counters
    pub fn observe_outcome(&self, outcome: &InsertOutcome) {
        let inner = self.inner();
        inner.files_processed.inc();
        if outcome.success {
            inner.files_succeeded.inc();
        } else {
            inner.files_failed.inc();
        }
        inner.rows_inserted.inc_by(outcome.rows);
        inner.rows_skipped.inc_by(outcome.skipped_rows);
        inner
            .insert_retries
            .inc_by(u64::from(outcome.attempts.saturating_sub(1)));
        inner
            .file_latency_seconds
            .observe(outcome.elapsed.as_secs_f64());
    }

    pub fn set_active_super_batch(&self, index: usize) {
        self.inner().active_super_batch.set(index as i64);
    }

    pub fn files_processed(&self) -> u64 {
        self.inner().files_processed.get()
    }

    pub fn rows_inserted(&self) -> u64 {
        self.inner().rows_inserted.get()
    }

    /// Render every registered metric in the Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&prometheus::gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Write the exposition for the node-exporter textfile collector.
    ///
    /// The file is written next to the target and renamed into place so the
    /// collector never reads a half-written file.
    pub fn write_textfile(&self, path: &Path) -> std::io::Result<()> {
        let body = self
            .render()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        let tmp = path.with_extension("prom.tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, path)
    }
}

/// Structured logger for run-level events
#[derive(Clone)]
pub struct StructuredLogger {
    run_id: String,
}

impl StructuredLogger {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn log_run_started(&self, total_files: usize, super_batches: usize) {
        info!(
            event = "run_started",
            run_id = %self.run_id,
            total_files = total_files,
            super_batches = super_batches,
            "Ingestion run started"
        );
    }

    pub fn log_super_batch_started(&self, index: usize, total: usize, files: usize) {
        info!(
            event = "super_batch_started",
            run_id = %self.run_id,
            super_batch = index + 1,
            total = total,
            files = files,
            "Processing super-batch"
        );
    }

    pub fn log_cooldown(&self, index: usize, cooldown: Duration) {
        info!(
            event = "cooldown",
            run_id = %self.run_id,
            super_batch = index + 1,
            cooldown_secs = cooldown.as_secs_f64(),
            "Super-batch finished, cooling down"
        );
    }

    pub fn log_file_failed(&self, outcome: &InsertOutcome) {
        warn!(
            event = "file_failed",
            run_id = %self.run_id,
            path = %outcome.path.display(),
            state = %outcome.state,
            committed_rows = outcome.rows,
            attempts = outcome.attempts,
            error = outcome.error.as_deref().unwrap_or("unknown"),
            "File import failed"
        );
    }

    pub fn log_run_completed(&self, stats: &RunStatistics) {
        if stats.interrupted {
            warn!(
                event = "run_completed",
                run_id = %self.run_id,
                processed = stats.processed,
                total_files = stats.total_files,
                succeeded = stats.succeeded,
                failed = stats.failed,
                total_rows = stats.total_rows,
                elapsed_secs = stats.elapsed().as_secs_f64(),
                "Ingestion run interrupted"
            );
        } else {
            info!(
                event = "run_completed",
                run_id = %self.run_id,
                processed = stats.processed,
                succeeded = stats.succeeded,
                failed = stats.failed,
                total_rows = stats.total_rows,
                elapsed_secs = stats.elapsed().as_secs_f64(),
                files_per_second = stats.files_per_second(),
                rows_per_second = stats.rows_per_second(),
                "Ingestion run completed"
            );
        }
    }
}
