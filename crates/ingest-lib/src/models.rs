//! Core data models for the ingestion pipeline

use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::trace;

/// One API metric observation, as loaded into `api_metrics`
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub service_name: String,
    pub endpoint: String,
    pub sample_time: NaiveDateTime,
    pub requests_per_minute: f32,
    pub latency: f32,
    pub query_window_start: NaiveDateTime,
    pub query_window_end: NaiveDateTime,
}

/// One input file plus its position in the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileJob {
    pub path: PathBuf,
    /// Zero-based super-batch index
    pub super_batch: usize,
    /// Zero-based position inside the super-batch
    pub position: usize,
}

impl FileJob {
    pub fn new(path: impl Into<PathBuf>, super_batch: usize, position: usize) -> Self {
        Self {
            path: path.into(),
            super_batch,
            position,
        }
    }
}

/// Lifecycle of a file job.
///
/// `Discovered -> Parsing -> {ParseFailed | Parsed} -> Inserting ->
/// {Retrying -> Inserting | InsertFailed | Inserted}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Discovered,
    Parsing,
    ParseFailed,
    Parsed,
    Inserting,
    /// Transient insert failure, another attempt will follow
    Retrying,
    /// Terminal insert failure
    InsertFailed,
    Inserted,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::ParseFailed | JobState::InsertFailed | JobState::Inserted
        )
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Discovered, Parsing)
                | (Parsing, ParseFailed)
                | (Parsing, Parsed)
                | (Parsed, Inserting)
                | (Inserting, Retrying)
                | (Retrying, Inserting)
                | (Inserting, InsertFailed)
                | (Inserting, Inserted)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Discovered => "discovered",
            JobState::Parsing => "parsing",
            JobState::ParseFailed => "parse_failed",
            JobState::Parsed => "parsed",
            JobState::Inserting => "inserting",
            JobState::Retrying => "retrying",
            JobState::InsertFailed => "insert_failed",
            JobState::Inserted => "inserted",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Walks one job through [`JobState`], refusing moves out of terminal states
#[derive(Debug)]
pub struct JobTracker {
    state: JobState,
}

impl JobTracker {
    pub fn new() -> Self {
        Self {
            state: JobState::Discovered,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn advance(&mut self, next: JobState) {
        let valid = self.state.can_transition_to(next);
        debug_assert!(valid, "invalid job transition {} -> {}", self.state, next);
        if valid {
            trace!(from = %self.state, to = %next, "Job state transition");
            self.state = next;
        }
    }
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable result of processing one file job
#[derive(Debug, Clone, Serialize)]
pub struct InsertOutcome {
    pub path: PathBuf,
    pub super_batch: usize,
    pub success: bool,
    pub error: Option<String>,
    /// Rows committed to the store, including sub-batches committed before a failure
    pub rows: u64,
    /// Rows dropped by validation
    pub skipped_rows: u64,
    pub size_bytes: u64,
    /// Change in process resident memory across the job
    pub memory_delta_bytes: i64,
    /// Insert attempts made (0 when nothing needed inserting)
    pub attempts: u32,
    pub state: JobState,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl InsertOutcome {
    /// Outcome for a job that panicked. The stage it reached is lost with
    /// the task, so it is reported as an insert failure.
    pub fn crashed(job: &FileJob, reason: impl Into<String>) -> Self {
        Self::failed_in(job, JobState::InsertFailed, reason)
    }

    /// Failed outcome that ended in `state` (`ParseFailed` or `InsertFailed`)
    pub fn failed_in(job: &FileJob, state: JobState, reason: impl Into<String>) -> Self {
        debug_assert!(
            state.is_terminal() && state != JobState::Inserted,
            "{state} is not a failure state"
        );
        Self {
            path: job.path.clone(),
            super_batch: job.super_batch,
            success: false,
            error: Some(reason.into()),
            rows: 0,
            skipped_rows: 0,
            size_bytes: 0,
            memory_delta_bytes: 0,
            attempts: 0,
            state,
            elapsed: Duration::ZERO,
        }
    }

    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn memory_delta_mb(&self) -> f64 {
        self.memory_delta_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Run-wide aggregate, owned by the coordinator's collection point
#[derive(Debug, Clone)]
pub struct RunStatistics {
    pub total_files: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_rows: u64,
    pub interrupted: bool,
    started: Instant,
    finished: Option<Instant>,
}

impl RunStatistics {
    pub fn new(total_files: usize) -> Self {
        Self {
            total_files,
            processed: 0,
            succeeded: 0,
            failed: 0,
            total_rows: 0,
            interrupted: false,
            started: Instant::now(),
            finished: None,
        }
    }

    /// Fold one outcome into the aggregate
    pub fn record(&mut self, outcome: &InsertOutcome) {
        self.processed += 1;
        // Partially committed files still contribute their rows.
        self.total_rows += outcome.rows;
        if outcome.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn finish(&mut self) {
        self.finished = Some(Instant::now());
    }

    pub fn elapsed(&self) -> Duration {
        self.finished.unwrap_or_else(Instant::now) - self.started
    }

    pub fn files_per_second(&self) -> f64 {
        rate(self.processed as f64, self.elapsed())
    }

    pub fn rows_per_second(&self) -> f64 {
        rate(self.total_rows as f64, self.elapsed())
    }
}

fn rate(count: f64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count / secs
    } else {
        0.0
    }
}
