//! Error types for `Tether` core library.

use thiserror::Error;

/// Result type alias using `Tether` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `Tether` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persisted bridge state error
    #[error("State error: {0}")]
    State(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
