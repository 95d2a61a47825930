//! Error types for the Naginata library.
//!
//! All fallible operations return [`Result`], whose error type is the
//! [`NaginataError`] enum. Each variant corresponds to one failure class of
//! the compaction engine, from plain I/O problems to corruption detected
//! while decoding table entries.

use std::io;

use anyhow;
use thiserror::Error;

/// The main error type for Naginata operations.
#[derive(Error, Debug)]
pub enum NaginataError {
    /// I/O errors (file operations, syncing, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An operation was attempted in a state that does not permit it,
    /// e.g. adding to a read-only table or adding keys out of order.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A caller-supplied value is out of the permitted domain.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// On-disk data failed to decode: malformed varint, malformed key,
    /// truncated record, or a tag that does not decompress.
    #[error("Database corrupt: {0}")]
    Corrupt(String),

    /// A stored value exceeds what the decoder can represent.
    #[error("Range error: {0}")]
    Range(String),

    /// The destination directory lock could not be acquired.
    #[error("Lock error: {0}")]
    Lock(String),

    /// The destination database could not be created.
    #[error("Database create error: {0}")]
    Create(String),

    /// JSON serialization/deserialization errors (version file payload).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases.
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error.
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with NaginataError.
pub type Result<T> = std::result::Result<T, NaginataError>;

impl NaginataError {
    /// Create a new invalid operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        NaginataError::InvalidOperation(msg.into())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        NaginataError::InvalidArgument(msg.into())
    }

    /// Create a new corruption error.
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        NaginataError::Corrupt(msg.into())
    }

    /// Create a new range error.
    pub fn range<S: Into<String>>(msg: S) -> Self {
        NaginataError::Range(msg.into())
    }

    /// Create a new lock error.
    pub fn lock<S: Into<String>>(msg: S) -> Self {
        NaginataError::Lock(msg.into())
    }

    /// Create a new database create error.
    pub fn create<S: Into<String>>(msg: S) -> Self {
        NaginataError::Create(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        NaginataError::Other(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = NaginataError::invalid_operation("add() on read-only table");
        assert_eq!(
            error.to_string(),
            "Invalid operation: add() on read-only table"
        );

        let error = NaginataError::corrupt("bad postlist key");
        assert_eq!(error.to_string(), "Database corrupt: bad postlist key");

        let error = NaginataError::lock("already locked");
        assert_eq!(error.to_string(), "Lock error: already locked");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let error = NaginataError::from(io_error);

        match error {
            NaginataError::Io(_) => {} // Expected
            _ => panic!("Expected IO error variant"),
        }
    }
}
