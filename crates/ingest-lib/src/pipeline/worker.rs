//! Per-job processing: parse one file, insert its records, report the outcome

use crate::input::parse_file;
use crate::models::{FileJob, InsertOutcome, JobState, JobTracker};
use crate::store::{BatchInserter, ConnectionFactory, ScopedConnection};
use std::sync::Arc;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::time::Instant;
use tracing::debug;

/// Samples this process's resident memory
pub struct MemorySampler {
    system: System,
    pid: Option<Pid>,
}

impl MemorySampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    /// Resident set size in bytes, if the platform reports it
    pub fn resident_bytes(&mut self) -> Option<u64> {
        let pid = self.pid?;
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            false,
            ProcessRefreshKind::nothing().with_memory(),
        );
        self.system.process(pid).map(|p| p.memory())
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a worker carries from job to job
pub(crate) struct WorkerState {
    pub conn: ScopedConnection,
    pub sampler: MemorySampler,
}

impl WorkerState {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            conn: ScopedConnection::new(factory),
            sampler: MemorySampler::new(),
        }
    }
}

/// Parse and insert one file. Every failure is folded into the outcome.
pub(crate) async fn process_job(
    job: &FileJob,
    state: &mut WorkerState,
    inserter: &BatchInserter,
) -> InsertOutcome {
    let started = Instant::now();
    let memory_before = state.sampler.resident_bytes();
    let mut tracker = JobTracker::new();

    let size_bytes = tokio::fs::metadata(&job.path)
        .await
        .map(|m| m.len())
        .unwrap_or(0);

    tracker.advance(JobState::Parsing);
    let path = job.path.clone();
    let parsed = match tokio::task::spawn_blocking(move || parse_file(&path)).await {
        Ok(Ok(parsed)) => parsed,
        Ok(Err(e)) => {
            tracker.advance(JobState::ParseFailed);
            return failed(job, &tracker, e.to_string(), size_bytes, started);
        }
        Err(e) => {
            tracker.advance(JobState::ParseFailed);
            return failed(job, &tracker, format!("parser task failed: {}", e), size_bytes, started);
        }
    };
    tracker.advance(JobState::Parsed);

    let skipped_rows = parsed.skipped;
    let report = inserter
        .insert(&mut state.conn, &parsed.records, &mut tracker)
        .await;
    // Record buffers go before the memory sample.
    drop(parsed);

    let memory_delta_bytes = match (memory_before, state.sampler.resident_bytes()) {
        (Some(before), Some(after)) => after as i64 - before as i64,
        _ => 0,
    };

    if let Some(failure) = &report.failure {
        debug!(
            path = %job.path.display(),
            committed_rows = report.rows_accepted,
            error = %failure,
            "File insert failed"
        );
    } else {
        debug!(
            path = %job.path.display(),
            rows = report.rows_accepted,
            attempts = report.attempts,
            "File inserted"
        );
    }

    InsertOutcome {
        path: job.path.clone(),
        super_batch: job.super_batch,
        success: report.is_success(),
        error: report.failure.as_ref().map(|f| f.to_string()),
        rows: report.rows_accepted,
        skipped_rows,
        size_bytes,
        memory_delta_bytes,
        attempts: report.attempts,
        state: tracker.state(),
        elapsed: started.elapsed(),
    }
}

fn failed(
    job: &FileJob,
    tracker: &JobTracker,
    reason: String,
    size_bytes: u64,
    started: Instant,
) -> InsertOutcome {
    debug!(path = %job.path.display(), error = %reason, "File could not be parsed");
    InsertOutcome {
        size_bytes,
        elapsed: started.elapsed(),
        ..InsertOutcome::failed_in(job, tracker.state(), reason)
    }
}
