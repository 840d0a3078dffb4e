//! Adaptive batched insertion
//!
//! One file's records are first sent as a single bulk insert. If that fails
//! the records are split into sub-batches and sent in order:
//! - a transient failure rebuilds the connection, sleeps
//!   `base_delay * attempt` and retries the same sub-batch
//! - a terminal failure stops the file immediately
//!
//! Sub-batches committed before a failure stay committed and are counted in
//! the report, so a failed file can be partially loaded.

use super::{ScopedConnection, StoreError};
use crate::models::{JobState, JobTracker, MetricRecord};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default rows per sub-batch
pub const DEFAULT_SUB_BATCH_SIZE: usize = 10_000;

/// Default attempt budget per file
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default linear backoff unit
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(3);

/// Retry and splitting policy for one file's insert
#[derive(Debug, Clone)]
pub struct InsertPolicy {
    /// Rows per sub-batch once the bulk insert has failed
    pub sub_batch_size: usize,
    /// Attempts per file, counting the first bulk insert
    pub max_attempts: u32,
    /// Backoff after the n-th failed attempt is `base_delay * n`
    pub base_delay: Duration,
}

impl Default for InsertPolicy {
    fn default() -> Self {
        Self {
            sub_batch_size: DEFAULT_SUB_BATCH_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl InsertPolicy {
    /// Delay before the attempt that follows failed attempt `attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.checked_mul(attempt).unwrap_or(Duration::MAX)
    }
}

/// Why a file's insert ended without loading everything
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InsertFailure {
    #[error("store rejected sub-batch {sub_batch} of {total}: {message}")]
    Rejected {
        sub_batch: usize,
        total: usize,
        message: String,
    },

    #[error("gave up after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },
}

/// Result of inserting one file's records
#[derive(Debug, Clone, Default)]
pub struct InsertReport {
    /// Rows the store acknowledged
    pub rows_accepted: u64,
    /// Attempts consumed, counting the first bulk insert
    pub attempts: u32,
    /// Connections discarded after transient failures
    pub rebuilds: u32,
    pub failure: Option<InsertFailure>,
}

impl InsertReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Pushes record sets into the store under an [`InsertPolicy`]
#[derive(Debug, Clone, Default)]
pub struct BatchInserter {
    policy: InsertPolicy,
}

impl BatchInserter {
    pub fn new(policy: InsertPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &InsertPolicy {
        &self.policy
    }

    /// Insert `records` over the worker's connection.
    ///
    /// `tracker` must be in [`JobState::Parsed`]; it ends in `Inserted` or
    /// `InsertFailed`.
    pub async fn insert(
        &self,
        conn: &mut ScopedConnection,
        records: &[MetricRecord],
        tracker: &mut JobTracker,
    ) -> InsertReport {
        let mut report = InsertReport::default();
        tracker.advance(JobState::Inserting);

        if records.is_empty() {
            tracker.advance(JobState::Inserted);
            return report;
        }

        report.attempts = 1;
        match Self::try_insert(conn, records).await {
            Ok(()) => {
                report.rows_accepted = records.len() as u64;
                tracker.advance(JobState::Inserted);
                return report;
            }
            Err(e) if e.is_transient() => {
                debug!(rows = records.len(), error = %e, "Bulk insert failed, splitting");
                if let Err(failure) = self.back_off(conn, &mut report, tracker, &e).await {
                    report.failure = Some(failure);
                    tracker.advance(JobState::InsertFailed);
                    return report;
                }
            }
            Err(e) => {
                // The split isolates which part the store refuses.
                debug!(rows = records.len(), error = %e, "Bulk insert rejected, splitting");
            }
        }

        let size = self.policy.sub_batch_size.max(1);
        let total = records.len().div_ceil(size);

        for (index, chunk) in records.chunks(size).enumerate() {
            loop {
                match Self::try_insert(conn, chunk).await {
                    Ok(()) => {
                        report.rows_accepted += chunk.len() as u64;
                        debug!(
                            sub_batch = index + 1,
                            total,
                            rows = chunk.len(),
                            "Sub-batch committed"
                        );
                        break;
                    }
                    Err(e) if e.is_transient() => {
                        if let Err(failure) = self.back_off(conn, &mut report, tracker, &e).await
                        {
                            report.failure = Some(failure);
                            tracker.advance(JobState::InsertFailed);
                            return report;
                        }
                    }
                    Err(e) => {
                        debug!(
                            sub_batch = index + 1,
                            total,
                            committed_rows = report.rows_accepted,
                            error = %e,
                            "Sub-batch rejected, abandoning file"
                        );
                        report.failure = Some(InsertFailure::Rejected {
                            sub_batch: index + 1,
                            total,
                            message: e.message().to_string(),
                        });
                        tracker.advance(JobState::InsertFailed);
                        return report;
                    }
                }
            }
        }

        tracker.advance(JobState::Inserted);
        report
    }

    async fn try_insert(
        conn: &mut ScopedConnection,
        records: &[MetricRecord],
    ) -> Result<(), StoreError> {
        conn.get().await?.insert(records).await
    }

    /// Consume an attempt after a transient failure: rebuild and sleep, or
    /// give up once the budget is spent.
    async fn back_off(
        &self,
        conn: &mut ScopedConnection,
        report: &mut InsertReport,
        tracker: &mut JobTracker,
        error: &StoreError,
    ) -> Result<(), InsertFailure> {
        if report.attempts >= self.policy.max_attempts {
            debug!(attempts = report.attempts, error = %error, "Retries exhausted");
            return Err(InsertFailure::RetriesExhausted {
                attempts: report.attempts,
                message: error.message().to_string(),
            });
        }

        tracker.advance(JobState::Retrying);
        conn.rebuild();
        report.rebuilds += 1;

        let delay = self.policy.backoff(report.attempts);
        debug!(
            attempt = report.attempts,
            delay_secs = delay.as_secs_f64(),
            "Backing off before retry"
        );
        tokio::time::sleep(delay).await;

        report.attempts += 1;
        tracker.advance(JobState::Inserting);
        Ok(())
    }
}
