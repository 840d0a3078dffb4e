//! Store access for the ingestion pipeline
//!
//! This module provides:
//! - A connection abstraction with typed transient/terminal error classes
//! - A ClickHouse HTTP-interface client
//! - Worker-scoped connection ownership with rebuild-on-failure
//! - The batch inserter with sub-batch splitting and linear backoff

mod clickhouse;
mod inserter;

#[cfg(test)]
pub(crate) mod testing;

pub use clickhouse::{ClickHouseClient, ClickHouseClientBuilder, ClickHouseFactory, StoreConfig};
pub use inserter::{BatchInserter, InsertFailure, InsertPolicy, InsertReport};

use crate::models::MetricRecord;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Whether a store failure is worth retrying on a fresh connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connection reset, timeout, broken pipe, gateway errors
    Transient,
    /// Data rejected, schema mismatch, anything else
    Terminal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Transient => f.write_str("transient"),
            ErrorClass::Terminal => f.write_str("terminal"),
        }
    }
}

/// Failure reported by a store connection
#[derive(Debug, Clone, Error)]
#[error("{class} store error: {message}")]
pub struct StoreError {
    class: ErrorClass,
    message: String,
}

impl StoreError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Transient,
            message: message.into(),
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Terminal,
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        self.class
    }

    pub fn is_transient(&self) -> bool {
        self.class == ErrorClass::Transient
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// One open handle to the target store
#[async_trait]
pub trait StoreConnection: Send {
    /// Insert records into `api_metrics` in the given order
    async fn insert(&mut self, records: &[MetricRecord]) -> Result<(), StoreError>;

    /// Run a statement that returns no rows
    async fn execute(&mut self, sql: &str) -> Result<(), StoreError>;
}

/// Opens fresh store connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError>;
}

/// A connection owned by exactly one worker.
///
/// Opened lazily on first use, replaced after transient failures, and
/// released when the owner drops it on any exit path.
pub struct ScopedConnection {
    factory: Arc<dyn ConnectionFactory>,
    conn: Option<Box<dyn StoreConnection>>,
    opened: u32,
}

impl ScopedConnection {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            conn: None,
            opened: 0,
        }
    }

    /// Borrow the live connection, opening one if needed
    pub async fn get(&mut self) -> Result<&mut dyn StoreConnection, StoreError> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                let conn = self.factory.connect().await?;
                self.opened += 1;
                debug!(opened = self.opened, "Opened store connection");
                conn
            }
        };
        Ok(self.conn.insert(conn).as_mut())
    }

    /// Drop the current connection so the next use opens a new one
    pub fn rebuild(&mut self) {
        if self.conn.take().is_some() {
            debug!("Discarded store connection for rebuild");
        }
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Number of connections opened through this scope so far
    pub fn connections_opened(&self) -> u32 {
        self.opened
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        if self.conn.take().is_some() {
            debug!(opened = self.opened, "Released store connection");
        }
    }
}
