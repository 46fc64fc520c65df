//! Error types for the buffer cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or driving the buffer cache
///
/// Cache misses are not errors; lookups return `None`. Demoting a table that
/// has not been persisted is a caller contract breach and panics instead of
/// returning a variant here.
#[derive(Error, Debug)]
pub enum Error {
    /// Argument or configuration value rejected
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration could not be parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Report serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Prometheus registration or encoding error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
