//! ClickHouse client over the HTTP interface
//!
//! Each [`ClickHouseClient`] owns its own `reqwest` connection pool, so
//! rebuilding a client really does drop the underlying sockets. Failures are
//! classified at the source:
//! - transport errors (connect, timeout, reset, broken pipe) are transient
//! - 408/429 and 502/503/504 from a proxy or an overloaded server are transient
//! - any other error status carries the server's message and is terminal

use super::{ConnectionFactory, StoreConnection, StoreError};
use crate::models::MetricRecord;
use crate::schema::{COLUMNS, TABLE_NAME};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Configuration for the ClickHouse HTTP client
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// HTTP interface URL (e.g., "http://localhost:8123")
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub database: String,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Whole-request timeout, including large inserts
    pub request_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8123".to_string(),
            username: "default".to_string(),
            password: String::new(),
            database: "default".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300),
        }
    }
}

/// Row layout sent with `FORMAT JSONEachRow`
#[derive(Serialize)]
struct StoreRow<'a> {
    service_name: &'a str,
    endpoint: &'a str,
    timestamp: String,
    cpm: f32,
    latency: f32,
    query_start_time: String,
    query_end_time: String,
}

impl<'a> From<&'a MetricRecord> for StoreRow<'a> {
    fn from(record: &'a MetricRecord) -> Self {
        Self {
            service_name: &record.service_name,
            endpoint: &record.endpoint,
            timestamp: record.sample_time.format(DATETIME_FORMAT).to_string(),
            cpm: record.requests_per_minute,
            latency: record.latency,
            query_start_time: record.query_window_start.format(DATETIME_FORMAT).to_string(),
            query_end_time: record.query_window_end.format(DATETIME_FORMAT).to_string(),
        }
    }
}

/// Encode records as newline-delimited JSON objects
pub(crate) fn encode_rows(records: &[MetricRecord]) -> Result<Vec<u8>, StoreError> {
    let mut body = Vec::with_capacity(records.len() * 160);
    for record in records {
        serde_json::to_writer(&mut body, &StoreRow::from(record))
            .map_err(|e| StoreError::terminal(format!("failed to encode row: {}", e)))?;
        body.push(b'\n');
    }
    Ok(body)
}

fn insert_statement() -> String {
    format!(
        "INSERT INTO {} ({}) FORMAT JSONEachRow",
        TABLE_NAME,
        COLUMNS.join(", ")
    )
}

/// Map a transport-level failure onto an error class
fn classify_transport(err: reqwest::Error) -> StoreError {
    if err.is_builder() {
        return StoreError::terminal(format!("invalid request: {}", err));
    }
    // Everything else (connect, timeout, reset, body I/O) is worth a fresh connection.
    StoreError::transient(err.to_string())
}

fn classify_status(status: StatusCode, body: &str) -> StoreError {
    let message = format!("HTTP {}: {}", status.as_u16(), body.trim());
    match status {
        StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => StoreError::transient(message),
        _ => StoreError::terminal(message),
    }
}

/// Client for the ClickHouse HTTP interface
pub struct ClickHouseClient {
    config: StoreConfig,
    base_url: Url,
    http: Client,
}

impl ClickHouseClient {
    /// Create a new client with its own connection pool
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        let base_url = Url::parse(&config.endpoint).map_err(|e| {
            StoreError::terminal(format!("invalid store endpoint {}: {}", config.endpoint, e))
        })?;

        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| StoreError::terminal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            base_url,
            http,
        })
    }

    /// Get the endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    fn url(&self, query: Option<&str>, extra: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("database", &self.config.database);
            if let Some(query) = query {
                pairs.append_pair("query", query);
            }
            for (key, value) in extra {
                pairs.append_pair(key, value);
            }
        }
        url
    }

    async fn post(&self, url: Url, body: Vec<u8>) -> Result<String, StoreError> {
        let response = self
            .http
            .post(url)
            .header("X-ClickHouse-User", &self.config.username)
            .header("X-ClickHouse-Key", &self.config.password)
            .body(body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let text = response.text().await.map_err(classify_transport)?;

        if !status.is_success() {
            return Err(classify_status(status, &text));
        }
        Ok(text)
    }

    /// Check that the server answers at all
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut url = self.base_url.clone();
        url.set_path("/ping");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        Ok(())
    }

    /// Run a statement that returns no rows
    pub async fn execute(&self, sql: &str) -> Result<(), StoreError> {
        debug!(sql = %sql, "Executing statement");
        self.post(self.url(None, &[]), sql.as_bytes().to_vec())
            .await
            .map(|_| ())
    }

    /// Run a query and decode each output row
    pub async fn query_rows<T: DeserializeOwned>(&self, sql: &str) -> Result<Vec<T>, StoreError> {
        let body = format!("{} FORMAT JSONEachRow", sql.trim().trim_end_matches(';'));
        let text = self
            .post(
                self.url(None, &[("output_format_json_quote_64bit_integers", "0")]),
                body.into_bytes(),
            )
            .await?;

        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line)
                    .map_err(|e| StoreError::terminal(format!("failed to decode row: {}", e)))
            })
            .collect()
    }

    /// Insert records into `api_metrics`
    pub async fn insert_records(&self, records: &[MetricRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let body = encode_rows(records)?;
        let statement = insert_statement();
        self.post(self.url(Some(&statement), &[]), body).await?;
        debug!(rows = records.len(), "Inserted rows");
        Ok(())
    }
}

#[async_trait]
impl StoreConnection for ClickHouseClient {
    async fn insert(&mut self, records: &[MetricRecord]) -> Result<(), StoreError> {
        self.insert_records(records).await
    }

    async fn execute(&mut self, sql: &str) -> Result<(), StoreError> {
        ClickHouseClient::execute(self, sql).await
    }
}

/// Opens a fresh, pinged [`ClickHouseClient`] per connection
#[derive(Debug, Clone)]
pub struct ClickHouseFactory {
    config: StoreConfig,
}

impl ClickHouseFactory {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

#[async_trait]
impl ConnectionFactory for ClickHouseFactory {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        let client = ClickHouseClient::new(self.config.clone())?;
        client.ping().await?;
        Ok(Box::new(client))
    }
}

/// Builder for ClickHouse client configuration
pub struct ClickHouseClientBuilder {
    config: StoreConfig,
}

impl ClickHouseClientBuilder {
    pub fn new() -> Self {
        Self {
            config: StoreConfig::default(),
        }
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = username.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = password.into();
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config.database = database.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ClickHouseClient, StoreError> {
        let client = ClickHouseClient::new(self.config)?;
        info!(endpoint = %client.endpoint(), "ClickHouse client configured");
        Ok(client)
    }
}

impl Default for ClickHouseClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
