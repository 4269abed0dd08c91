//! Work item input

pub mod csv;

pub use self::csv::{scan, CsvItems, ParseCounts, ParseSummary};

/// Input errors
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// Input file does not exist
    #[error("input file not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("IO error reading {path}: {message}")]
    Io {
        /// File involved
        path: String,
        /// Underlying error
        message: String,
    },

    /// No valid items in the input
    #[error("no valid items found in {0}")]
    Empty(String),
}
