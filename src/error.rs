//! Error types for rowgate operations.

use thiserror::Error;

/// The main error type.
///
/// The taxonomy matters to callers: a [`Error::NotFound`] during relation
/// expansion means "skip this column", while a [`Error::Storage`] aborts
/// the operation that triggered it.
#[derive(Debug, Error)]
pub enum Error {
    /// A row or reference id that was looked up does not exist.
    #[error("no such object [{table}][{key}]")]
    NotFound { table: String, key: String },

    /// The backing store failed to execute a statement.
    #[error("storage error: {0}")]
    Storage(String),

    /// Stored data could not be decoded (permission bitmask, JSON blob).
    #[error("malformed data: {0}")]
    Malformed(String),

    /// The schema registry is missing something the operation needs.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn not_found(table: &str, key: impl std::fmt::Display) -> Self {
        Error::NotFound {
            table: table.to_string(),
            key: key.to_string(),
        }
    }

    /// True for the typed miss, false for transport/storage failures.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Result type alias for rowgate operations.
pub type Result<T> = std::result::Result<T, Error>;
