//! Bulk loader for API metric exports
//!
//! This crate provides the core functionality for:
//! - Discovering and parsing metric CSV exports
//! - Validating records against the `api_metrics` schema
//! - Adaptive batched insertion into ClickHouse with retry
//! - A super-batched worker pool with cooldowns
//! - Run reporting and observability

pub mod input;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod reporter;
pub mod schema;
pub mod store;

pub use models::*;
pub use observability::{IngestMetrics, StructuredLogger};
pub use pipeline::{ensure_schema, Coordinator, CoordinatorBuilder, OutcomeSink, PipelineError, PoolConfig};
pub use reporter::{ReporterConfig, RunReporter, RunSummary};
