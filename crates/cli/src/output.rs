//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table from a list of items
pub fn print_table<T: Tabled + Serialize>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No rows found".yellow());
                return;
            }
            println!("{}", render_table(items));
        }
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string_pretty(&items) {
                println!("{}", json);
            }
        }
    }
}

pub fn render_table<T: Tabled>(items: &[T]) -> String {
    Table::new(items).with(Style::rounded()).to_string()
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a CPM total with two decimals
pub fn format_cpm(cpm: f64) -> String {
    format!("{:.2}", cpm)
}

/// Format an average latency in milliseconds
pub fn format_latency(ms: f64) -> String {
    if ms >= 1000.0 {
        format!("{:.2}s", ms / 1000.0)
    } else {
        format!("{:.2}ms", ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Tabled, Serialize)]
    struct Row {
        #[tabled(rename = "Name")]
        name: &'static str,
    }

    #[test]
    fn test_format_cpm() {
        assert_eq!(format_cpm(12.0), "12.00");
        assert_eq!(format_cpm(1234.567), "1234.57");
    }

    #[test]
    fn test_format_latency() {
        assert_eq!(format_latency(20.25), "20.25ms");
        assert_eq!(format_latency(1500.0), "1.50s");
    }

    #[test]
    fn test_render_table_has_headers() {
        let table = render_table(&[Row { name: "orders" }]);
        assert!(table.contains("Name"));
        assert!(table.contains("orders"));
    }
}
