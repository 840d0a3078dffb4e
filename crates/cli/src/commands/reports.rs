//! Report queries over `api_metrics`

use anyhow::{Context, Result};
use ingest_lib::schema::TABLE_NAME;
use ingest_lib::store::ClickHouseClient;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::output::{format_cpm, format_latency, print_table, OutputFormat};

/// Endpoint ranked by summed CPM
#[derive(Debug, Clone, Deserialize, Serialize, Tabled)]
pub struct EndpointRow {
    #[tabled(rename = "Service")]
    pub service_name: String,
    #[tabled(rename = "Endpoint")]
    pub endpoint: String,
    #[tabled(rename = "Total CPM", display_with = "display_cpm")]
    pub total_cpm: f64,
    #[tabled(rename = "Avg Latency", display_with = "display_latency")]
    pub avg_latency: f64,
    #[tabled(rename = "Samples")]
    pub total_requests: u64,
}

/// Sample time ranked by summed CPM
#[derive(Debug, Clone, Deserialize, Serialize, Tabled)]
pub struct TimestampRow {
    #[tabled(rename = "Timestamp")]
    pub timestamp: String,
    #[tabled(rename = "Total CPM", display_with = "display_cpm")]
    pub total_cpm: f64,
}

/// Busiest minute of one day
#[derive(Debug, Clone, Deserialize, Serialize, Tabled)]
pub struct DailyPeakRow {
    #[tabled(rename = "Date")]
    pub date: String,
    #[tabled(rename = "Peak Minute")]
    pub minute: String,
    #[tabled(rename = "Total CPM", display_with = "display_cpm")]
    pub total_cpm: f64,
}

fn display_cpm(value: &f64) -> String {
    format_cpm(*value)
}

fn display_latency(value: &f64) -> String {
    format_latency(*value)
}

pub fn top_endpoints_sql(limit: u32) -> String {
    format!(
        "SELECT service_name, endpoint, sum(cpm) AS total_cpm, avg(latency) AS avg_latency, \
         count() AS total_requests FROM {TABLE_NAME} GROUP BY service_name, endpoint \
         ORDER BY total_cpm DESC LIMIT {limit}"
    )
}

pub fn top_timestamps_sql(limit: u32) -> String {
    format!(
        "SELECT toString(timestamp) AS timestamp, sum(cpm) AS total_cpm FROM {TABLE_NAME} \
         GROUP BY timestamp ORDER BY total_cpm DESC LIMIT {limit}"
    )
}

pub fn daily_peaks_sql() -> String {
    format!(
        "WITH daily_minute_cpm AS (\
         SELECT toDate(timestamp) AS date, toStartOfMinute(timestamp) AS minute, \
         sum(cpm) AS total_cpm FROM {TABLE_NAME} GROUP BY date, minute) \
         SELECT toString(date) AS date, toString(minute) AS minute, total_cpm \
         FROM daily_minute_cpm \
         WHERE (date, total_cpm) IN (SELECT date, max(total_cpm) FROM daily_minute_cpm GROUP BY date) \
         ORDER BY date"
    )
}

pub async fn fetch_top_endpoints(client: &ClickHouseClient, limit: u32) -> Result<Vec<EndpointRow>> {
    client
        .query_rows(&top_endpoints_sql(limit))
        .await
        .context("Failed to query top endpoints")
}

pub async fn fetch_top_timestamps(
    client: &ClickHouseClient,
    limit: u32,
) -> Result<Vec<TimestampRow>> {
    client
        .query_rows(&top_timestamps_sql(limit))
        .await
        .context("Failed to query top timestamps")
}

pub async fn fetch_daily_peaks(client: &ClickHouseClient) -> Result<Vec<DailyPeakRow>> {
    client
        .query_rows(&daily_peaks_sql())
        .await
        .context("Failed to query daily peaks")
}

pub async fn top_endpoints(client: &ClickHouseClient, limit: u32, format: OutputFormat) -> Result<()> {
    let rows = fetch_top_endpoints(client, limit).await?;
    print_table(&rows, format);
    Ok(())
}

pub async fn top_timestamps(
    client: &ClickHouseClient,
    limit: u32,
    format: OutputFormat,
) -> Result<()> {
    let rows = fetch_top_timestamps(client, limit).await?;
    print_table(&rows, format);
    Ok(())
}

pub async fn daily_peaks(client: &ClickHouseClient, format: OutputFormat) -> Result<()> {
    let rows = fetch_daily_peaks(client).await?;
    print_table(&rows, format);
    Ok(())
}
