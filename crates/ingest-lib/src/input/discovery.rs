//! Input file discovery
//!
//! Recursively walks the input root and selects files whose name ends with
//! the export suffix. The returned order is sorted so retries see the same
//! sequence.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Suffix of the per-service detail exports
pub const DEFAULT_FILE_SUFFIX: &str = "明细.csv";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("input root {0} does not exist")]
    NotFound(PathBuf),

    #[error("input root {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("input root {path} is unreadable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Enumerate files under `root` whose file name ends with `suffix`.
///
/// An empty result is not an error.
pub fn discover(root: &Path, suffix: &str) -> Result<Vec<PathBuf>, DiscoveryError> {
    let metadata = match std::fs::metadata(root) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(DiscoveryError::NotFound(root.to_path_buf()))
        }
        Err(source) => {
            return Err(DiscoveryError::Unreadable {
                path: root.to_path_buf(),
                source,
            })
        }
    };
    if !metadata.is_dir() {
        return Err(DiscoveryError::NotADirectory(root.to_path_buf()));
    }
    std::fs::read_dir(root).map_err(|source| DiscoveryError::Unreadable {
        path: root.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                // A bad subdirectory should not sink the whole run.
                warn!(error = %e, "Skipping unreadable path during discovery");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        if entry.file_name().to_string_lossy().ends_with(suffix) {
            debug!(path = %entry.path().display(), "Discovered input file");
            files.push(entry.into_path());
        }
    }

    files.sort();
    info!(root = %root.display(), count = files.len(), "Input discovery complete");
    Ok(files)
}
