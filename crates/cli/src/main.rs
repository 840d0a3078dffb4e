//! mq - query tool for the api_metrics table
//!
//! Checks connectivity to ClickHouse and runs the standard traffic reports
//! over loaded API metrics.

mod commands;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{ping, reports};
use ingest_lib::store::{ClickHouseClient, ClickHouseClientBuilder};

/// API metrics query CLI
#[derive(Parser)]
#[command(name = "mq")]
#[command(author, version, about = "Query tool for loaded API metrics", long_about = None)]
pub struct Cli {
    /// ClickHouse HTTP endpoint
    #[arg(long, env = "CLICKHOUSE_ENDPOINT", default_value = "http://localhost:8123")]
    pub endpoint: String,

    /// ClickHouse user
    #[arg(long, env = "CLICKHOUSE_USER", default_value = "default")]
    pub user: String,

    /// ClickHouse password
    #[arg(long, env = "CLICKHOUSE_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    /// ClickHouse database
    #[arg(long, env = "CLICKHOUSE_DATABASE", default_value = "default")]
    pub database: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check connectivity and list databases
    Ping,

    /// Endpoints with the highest summed CPM
    TopEndpoints {
        /// Number of rows to show
        #[arg(long, short, default_value_t = 10)]
        limit: u32,
    },

    /// Sample times with the highest summed CPM
    TopTimestamps {
        /// Number of rows to show
        #[arg(long, short, default_value_t = 10)]
        limit: u32,
    },

    /// Busiest minute of every day
    DailyPeaks,
}

impl Cli {
    fn client(&self) -> Result<ClickHouseClient> {
        ClickHouseClientBuilder::new()
            .endpoint(&self.endpoint)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
            .build()
            .context("Failed to create ClickHouse client")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = cli.client()?;

    let result = match cli.command {
        Commands::Ping => ping::ping(&client, cli.format).await,
        Commands::TopEndpoints { limit } => {
            reports::top_endpoints(&client, limit, cli.format).await
        }
        Commands::TopTimestamps { limit } => {
            reports::top_timestamps(&client, limit, cli.format).await
        }
        Commands::DailyPeaks => reports::daily_peaks(&client, cli.format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}
