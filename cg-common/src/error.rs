//! Common error types for ConvGuard

use thiserror::Error;

/// Common result type for ConvGuard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the ConvGuard crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid caller input (missing session id, empty text, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors caused by the caller rather than the service
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Error::InvalidInput(_))
    }
}
