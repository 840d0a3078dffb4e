//! Parallel ingestion pipeline
//!
//! Files are processed in fixed-size super-batches by a bounded pool of
//! workers, each owning one store connection. A cooldown separates
//! super-batches. Outcomes stream to an [`OutcomeSink`] in completion order.

mod coordinator;
mod worker;


pub use coordinator::{default_workers, Coordinator, CoordinatorBuilder, PoolConfig};
pub use worker::MemorySampler;

use crate::input::DiscoveryError;
use crate::models::{InsertOutcome, RunStatistics};
use crate::schema::CREATE_TABLE_SQL;
use crate::store::{ConnectionFactory, StoreError};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Run-level failures. Everything per-file becomes an outcome instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("run was not confirmed")]
    NotConfirmed,

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("failed to prepare schema: {0}")]
    Schema(#[source] StoreError),
}

/// Receives pipeline progress on the coordinator's collection point
pub trait OutcomeSink {
    fn on_run_start(&mut self, _total_files: usize, _super_batches: usize) {}

    fn on_super_batch_start(&mut self, _index: usize, _total: usize, _files: usize) {}

    fn on_cooldown(&mut self, _index: usize, _cooldown: Duration) {}

    fn on_outcome(&mut self, outcome: &InsertOutcome, stats: &RunStatistics);

    fn on_run_complete(&mut self, _stats: &RunStatistics) {}
}

/// Create `api_metrics` if it does not exist yet
pub async fn ensure_schema(factory: &dyn ConnectionFactory) -> Result<(), PipelineError> {
    let mut conn = factory.connect().await.map_err(PipelineError::Schema)?;
    conn.execute(CREATE_TABLE_SQL)
        .await
        .map_err(PipelineError::Schema)?;
    info!("Table api_metrics created/verified");
    Ok(())
}
