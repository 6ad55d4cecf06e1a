use std::io;

use thiserror::Error;

/// Result type used throughout the storage engine and executor.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by storage, index, expression and statement handling.
///
/// Everything here is converted into a single `ERROR: <message>` line at the
/// statement boundary; only socket failures close a connection.
#[derive(Debug, Error)]
pub enum Error {
    /// A fixed-size read came back short.
    #[error("truncated read: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Stored bytes do not decode (length over the declared maximum, bad UTF-8, bad header).
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// A value does not fit the field it is being written into.
    #[error("value of {length} bytes exceeds maximum length {max}")]
    EncodingTooLong { length: usize, max: usize },

    /// Type-mismatched evaluation, incomparable operands, or a misuse of a storage API.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Unknown table or column.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request is not a supported statement.
    #[error("malformed statement: {0}")]
    Malformed(String),

    /// Table or index file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<sqlparser::parser::ParserError> for Error {
    fn from(e: sqlparser::parser::ParserError) -> Self {
        Error::Malformed(e.to_string())
    }
}
