//! Worker pool coordinator
//!
//! Splits the file list into super-batches and drives each one through a
//! bounded pool of workers. Workers pull jobs from a shared queue, so a slow
//! file never blocks the others. After a super-batch drains, the coordinator
//! sleeps for the cooldown before starting the next one.

use super::worker::{process_job, WorkerState};
use super::{OutcomeSink, PipelineError};
use crate::models::{FileJob, InsertOutcome, RunStatistics};
use crate::store::{BatchInserter, ConnectionFactory, InsertPolicy};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Upper bound for the default pool size
pub const MAX_DEFAULT_WORKERS: usize = 16;

/// Default pool size: one core left for the coordinator, capped at 16
pub fn default_workers() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    cores.saturating_sub(1).clamp(1, MAX_DEFAULT_WORKERS)
}

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Concurrent workers per super-batch
    pub workers: usize,
    /// Files per super-batch (default: 10,000)
    pub super_batch_size: usize,
    /// Pause between super-batches (default: 15 seconds)
    pub cooldown: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            super_batch_size: 10_000,
            cooldown: Duration::from_secs(15),
        }
    }
}

/// Drives the whole run and owns the run statistics
pub struct Coordinator {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    inserter: BatchInserter,
    shutdown: watch::Receiver<bool>,
    // Keeps the default shutdown channel open when none was supplied.
    _shutdown_tx: Option<watch::Sender<bool>>,
}

impl Coordinator {
    pub fn new(
        config: PoolConfig,
        factory: Arc<dyn ConnectionFactory>,
        inserter: BatchInserter,
    ) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            config,
            factory,
            inserter,
            shutdown: rx,
            _shutdown_tx: Some(tx),
        }
    }

    /// Stop dispatching new jobs once `true` is sent on this channel
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self._shutdown_tx = None;
        self
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Group files into super-batches of jobs
    pub fn plan(&self, files: Vec<PathBuf>) -> Vec<Vec<FileJob>> {
        let size = self.config.super_batch_size.max(1);
        let mut batches: Vec<Vec<FileJob>> = Vec::with_capacity(files.len().div_ceil(size));
        for (i, path) in files.into_iter().enumerate() {
            let (batch, position) = (i / size, i % size);
            if position == 0 {
                batches.push(Vec::with_capacity(size));
            }
            batches[batch].push(FileJob::new(path, batch, position));
        }
        batches
    }

    /// Process every file. `proceed` is the operator's prior confirmation.
    pub async fn run<S: OutcomeSink>(
        &self,
        files: Vec<PathBuf>,
        proceed: bool,
        sink: &mut S,
    ) -> Result<RunStatistics, PipelineError> {
        if !proceed {
            return Err(PipelineError::NotConfirmed);
        }

        let batches = self.plan(files);
        let total_files = batches.iter().map(Vec::len).sum();
        let mut stats = RunStatistics::new(total_files);

        info!(
            files = total_files,
            super_batches = batches.len(),
            workers = self.config.workers,
            "Starting ingestion run"
        );
        sink.on_run_start(total_files, batches.len());

        let total_batches = batches.len();
        for (index, batch) in batches.into_iter().enumerate() {
            if self.shutdown_requested() {
                break;
            }

            sink.on_super_batch_start(index, total_batches, batch.len());
            self.run_super_batch(batch, &mut stats, sink).await;

            if self.shutdown_requested() {
                break;
            }

            if index + 1 < total_batches && !self.config.cooldown.is_zero() {
                sink.on_cooldown(index, self.config.cooldown);
                let mut shutdown = self.shutdown.clone();
                tokio::select! {
                    _ = tokio::time::sleep(self.config.cooldown) => {}
                    _ = wait_for_shutdown(&mut shutdown) => {
                        info!("Shutdown requested during cooldown");
                    }
                }
            }
        }

        // A shutdown that lands after the last file is not an interruption.
        stats.interrupted = stats.processed < stats.total_files;

        stats.finish();
        sink.on_run_complete(&stats);
        Ok(stats)
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn run_super_batch<S: OutcomeSink>(
        &self,
        batch: Vec<FileJob>,
        stats: &mut RunStatistics,
        sink: &mut S,
    ) {
        let workers = self.config.workers.max(1).min(batch.len());
        let queue = Arc::new(Mutex::new(VecDeque::from(batch)));
        let (outcome_tx, mut outcome_rx) = mpsc::channel(workers * 2);

        let mut pool = JoinSet::new();
        for id in 0..workers {
            pool.spawn(run_worker(
                id,
                queue.clone(),
                self.factory.clone(),
                self.inserter.clone(),
                outcome_tx.clone(),
                self.shutdown.clone(),
            ));
        }
        drop(outcome_tx);

        // Single collection point: only this loop touches the statistics.
        while let Some(outcome) = outcome_rx.recv().await {
            stats.record(&outcome);
            sink.on_outcome(&outcome, stats);
        }

        while let Some(result) = pool.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
    }
}

/// Pull jobs until the queue is empty or shutdown is requested
async fn run_worker(
    id: usize,
    queue: Arc<Mutex<VecDeque<FileJob>>>,
    factory: Arc<dyn ConnectionFactory>,
    inserter: BatchInserter,
    outcomes: mpsc::Sender<InsertOutcome>,
    shutdown: watch::Receiver<bool>,
) {
    debug!(worker = id, "Worker started");
    let mut carried: Option<WorkerState> = None;

    loop {
        if *shutdown.borrow() {
            debug!(worker = id, "Worker stopping on shutdown");
            break;
        }

        let job = match queue.lock() {
            Ok(mut queue) => queue.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        let Some(job) = job else { break };

        let mut state = carried
            .take()
            .unwrap_or_else(|| WorkerState::new(factory.clone()));
        let task_job = job.clone();
        let task_inserter = inserter.clone();

        // A panic inside the job unwinds only this task; its connection is
        // dropped with it and the next job opens a fresh one.
        let handle = tokio::spawn(async move {
            let outcome = process_job(&task_job, &mut state, &task_inserter).await;
            (outcome, state)
        });

        let outcome = match handle.await {
            Ok((outcome, state)) => {
                carried = Some(state);
                outcome
            }
            Err(e) => {
                debug!(worker = id, path = %job.path.display(), error = %e, "Job crashed");
                InsertOutcome::crashed(&job, format!("worker crashed: {}", e))
            }
        };

        if outcomes.send(outcome).await.is_err() {
            break;
        }
    }

    debug!(worker = id, "Worker finished");
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            // Sender gone: shutdown can no longer be requested.
            std::future::pending::<()>().await;
        }
    }
}

/// Builder for the coordinator
pub struct CoordinatorBuilder {
    config: PoolConfig,
    policy: InsertPolicy,
    factory: Option<Arc<dyn ConnectionFactory>>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
            policy: InsertPolicy::default(),
            factory: None,
            shutdown: None,
        }
    }

    pub fn factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn insert_policy(mut self, policy: InsertPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn super_batch_size(mut self, size: usize) -> Self {
        self.config.super_batch_size = size;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.config.cooldown = cooldown;
        self
    }

    pub fn shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn build(self) -> anyhow::Result<Coordinator> {
        let factory = self
            .factory
            .ok_or_else(|| anyhow::anyhow!("Connection factory is required"))?;

        let coordinator = Coordinator::new(self.config, factory, BatchInserter::new(self.policy));
        Ok(match self.shutdown {
            Some(rx) => coordinator.with_shutdown(rx),
            None => coordinator,
        })
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
