//! Errors raised while reading the static transit tables.

/// Errors from streaming or indexing a transit table.
#[derive(Debug, thiserror::Error)]
pub enum GtfsError {
    /// I/O error opening or reading a file.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The header lacks a column the table needs.
    #[error("{path} has no '{column}' column")]
    MissingColumn {
        /// Path to the CSV file.
        path: String,
        /// Missing column name.
        column: &'static str,
    },

    /// The file has no header line.
    #[error("{0} is empty")]
    EmptyFile(String),
}
