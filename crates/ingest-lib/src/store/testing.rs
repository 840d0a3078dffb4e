//! Scripted in-memory store for pipeline tests

use super::{ConnectionFactory, StoreConnection, StoreError};
use crate::models::MetricRecord;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// One insert call as seen by the store
#[derive(Debug, Clone)]
pub struct InsertCall {
    /// `service_name` of the first record, used as the scripting key
    pub key: String,
    pub endpoints: Vec<String>,
    pub rows: usize,
    pub connection: u32,
    pub at: Instant,
    pub committed: bool,
}

#[derive(Default)]
struct ScriptState {
    responses: HashMap<String, VecDeque<Result<(), StoreError>>>,
    panics: Vec<String>,
    calls: Vec<InsertCall>,
    statements: Vec<String>,
    connects: u32,
    connect_failures: VecDeque<StoreError>,
}

/// Factory whose connections answer from a per-key script.
///
/// Inserts with no scripted response succeed.
#[derive(Clone, Default)]
pub struct ScriptedStore {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue responses for inserts whose first record has `service_name == key`
    pub fn script(&self, key: &str, responses: Vec<Result<(), StoreError>>) {
        let mut state = self.state.lock().unwrap();
        state
            .responses
            .entry(key.to_string())
            .or_default()
            .extend(responses);
    }

    /// Make inserts for `key` panic inside the worker
    pub fn panic_on(&self, key: &str) {
        self.state.lock().unwrap().panics.push(key.to_string());
    }

    pub fn fail_next_connect(&self, error: StoreError) {
        self.state.lock().unwrap().connect_failures.push_back(error);
    }

    pub fn calls(&self) -> Vec<InsertCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_for(&self, key: &str) -> Vec<InsertCall> {
        self.calls().into_iter().filter(|c| c.key == key).collect()
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().statements.clone()
    }

    pub fn connects(&self) -> u32 {
        self.state.lock().unwrap().connects
    }

    pub fn factory(&self) -> Arc<dyn ConnectionFactory> {
        Arc::new(self.clone())
    }
}

struct ScriptedConnection {
    id: u32,
    state: Arc<Mutex<ScriptState>>,
}

#[async_trait]
impl StoreConnection for ScriptedConnection {
    async fn insert(&mut self, records: &[MetricRecord]) -> Result<(), StoreError> {
        let key = records
            .first()
            .map(|r| r.service_name.clone())
            .unwrap_or_default();

        let response = {
            let mut state = self.state.lock().unwrap();
            if state.panics.contains(&key) {
                drop(state);
                panic!("scripted panic for {key}");
            }
            let response = state
                .responses
                .get_mut(&key)
                .and_then(|queue| queue.pop_front())
                .unwrap_or(Ok(()));
            state.calls.push(InsertCall {
                key,
                endpoints: records.iter().map(|r| r.endpoint.clone()).collect(),
                rows: records.len(),
                connection: self.id,
                at: Instant::now(),
                committed: response.is_ok(),
            });
            response
        };
        // Yield so concurrent workers interleave like real I/O.
        tokio::task::yield_now().await;
        response
    }

    async fn execute(&mut self, sql: &str) -> Result<(), StoreError> {
        self.state.lock().unwrap().statements.push(sql.to_string());
        Ok(())
    }
}

#[async_trait]
impl ConnectionFactory for ScriptedStore {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.connect_failures.pop_front() {
            return Err(err);
        }
        state.connects += 1;
        Ok(Box::new(ScriptedConnection {
            id: state.connects,
            state: self.state.clone(),
        }))
    }
}
