//! Per-file CSV parsing
//!
//! Reads one export file, skips the header line, and runs every row through
//! [`parse_record`]. Invalid rows are counted and dropped.

use crate::models::MetricRecord;
use crate::schema::parse_record;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Records accepted from one file
#[derive(Debug, Default)]
pub struct ParsedFile {
    pub records: Vec<MetricRecord>,
    pub skipped: u64,
}

/// Unrecoverable file-level failure
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8 near line {line}")]
    Encoding { path: PathBuf, line: u64 },

    #[error("malformed CSV in {path}: {message}")]
    Malformed { path: PathBuf, message: String },
}

impl ParseError {
    fn from_csv(path: &Path, err: csv::Error) -> Self {
        let line = err.position().map(|p| p.line()).unwrap_or(0);
        match err.into_kind() {
            csv::ErrorKind::Io(source) => ParseError::Io {
                path: path.to_path_buf(),
                source,
            },
            csv::ErrorKind::Utf8 { .. } => ParseError::Encoding {
                path: path.to_path_buf(),
                line,
            },
            other => ParseError::Malformed {
                path: path.to_path_buf(),
                message: format!("{:?}", other),
            },
        }
    }
}

/// Parse one export file into validated records.
///
/// A file with no valid rows yields an empty [`ParsedFile`], not an error.
pub fn parse_file(path: &Path) -> Result<ParsedFile, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| ParseError::from_csv(path, e))?;

    let mut parsed = ParsedFile::default();
    let mut row = csv::StringRecord::new();

    while reader
        .read_record(&mut row)
        .map_err(|e| ParseError::from_csv(path, e))?
    {
        let fields: Vec<&str> = row.iter().collect();

        match parse_record(&fields) {
            Ok(record) => parsed.records.push(record),
            Err(_) => parsed.skipped += 1,
        }
    }

    debug!(
        path = %path.display(),
        accepted = parsed.records.len(),
        skipped = parsed.skipped,
        "Parsed input file"
    );

    Ok(parsed)
}
