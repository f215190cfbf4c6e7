//! Common error types for fpid

use thiserror::Error;

/// Common result type for fpid operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across fpid crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error (task arguments)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The atomic binding upsert was rejected by the store
    /// (e.g. the track does not exist)
    #[error("Binding conflict: {0}")]
    BindingConflict(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
