//! Error types for ctsearch.

use thiserror::Error;

/// Result type alias using ctsearch's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for ctsearch operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The record store could not be reached (pool creation or acquisition failed)
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Inference/generation failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error should stop a whole batch run rather than fail a
    /// single record.
    ///
    /// Transport, configuration and store failures affect every remaining
    /// record; everything else is specific to the record being processed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Request(_) | Error::Config(_) | Error::StoreUnavailable(_) | Error::Io(_)
        )
    }

    /// Map a sqlx error, classifying connectivity failures as
    /// [`Error::StoreUnavailable`].
    pub fn from_store(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => Error::StoreUnavailable(err.to_string()),
            other => Error::Database(other),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
