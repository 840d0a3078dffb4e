//! Input side of the pipeline
//!
//! Finds metric export files under a root directory and turns each one into
//! validated records. Rows that fail validation are dropped and counted,
//! never partially kept.

mod discovery;
mod parser;

#[cfg(test)]
mod tests;

pub use discovery::{discover, DiscoveryError, DEFAULT_FILE_SUFFIX};
pub use parser::{parse_file, ParseError, ParsedFile};
