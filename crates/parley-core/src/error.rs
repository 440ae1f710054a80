//! Error types for parley.

use thiserror::Error;

/// Result type alias using parley's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for parley operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input (missing or malformed field)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No identity, or the token did not resolve to one
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not a participant of the conversation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Shorthand for the non-participant outcome.
    pub fn not_a_participant(conversation_id: uuid::Uuid) -> Self {
        Error::Forbidden(format!(
            "not a participant of conversation {}",
            conversation_id
        ))
    }
}
