//! Connectivity smoke test

use anyhow::{Context, Result};
use colored::Colorize;
use ingest_lib::store::ClickHouseClient;
use serde::{Deserialize, Serialize};

use crate::output::{print_info, print_success, OutputFormat};

#[derive(Debug, Deserialize)]
struct VersionRow {
    version: String,
}

#[derive(Debug, Deserialize)]
struct DatabaseRow {
    name: String,
}

/// What the server reported back
#[derive(Debug, Serialize, PartialEq)]
pub struct ServerInfo {
    pub endpoint: String,
    pub version: String,
    pub databases: Vec<String>,
}

pub async fn fetch_server_info(client: &ClickHouseClient) -> Result<ServerInfo> {
    client.ping().await.context("Server did not answer /ping")?;

    let version = client
        .query_rows::<VersionRow>("SELECT version() AS version")
        .await
        .context("Failed to read server version")?
        .into_iter()
        .next()
        .map(|row| row.version)
        .unwrap_or_default();

    let databases = client
        .query_rows::<DatabaseRow>("SHOW DATABASES")
        .await
        .context("Failed to list databases")?
        .into_iter()
        .map(|row| row.name)
        .collect();

    Ok(ServerInfo {
        endpoint: client.endpoint().to_string(),
        version,
        databases,
    })
}

/// Check connectivity and list databases
pub async fn ping(client: &ClickHouseClient, format: OutputFormat) -> Result<()> {
    let info = fetch_server_info(client).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        OutputFormat::Table => {
            print_success(&format!("Connected to {}", info.endpoint.cyan()));
            print_info(&format!("Server version: {}", info.version));
            println!("{}", "Available databases:".bold());
            for db in &info.databases {
                println!("  - {}", db);
            }
        }
    }

    Ok(())
}
