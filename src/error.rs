//! Error types for Tally.

use thiserror::Error;

/// Main error type for Tally operations.
#[derive(Error, Debug)]
pub enum TallyError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shared storage failures: connection, transaction and reply decoding
    #[error("Storage backend error: {0}")]
    Backend(#[from] redis::RedisError),

    /// An instant that cannot be represented as nanoseconds since the epoch
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tally operations.
pub type Result<T> = std::result::Result<T, TallyError>;
