use thiserror::Error;

use crate::OutboxId;

/// Errors that can occur when interacting with the outbox store.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// No outbox entry exists with the given id.
    #[error("Outbox entry not found: {0}")]
    NotFound(OutboxId),

    /// A stored status value could not be parsed.
    #[error("Invalid outbox status: {0}")]
    InvalidStatus(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for outbox store operations.
pub type Result<T> = std::result::Result<T, OutboxError>;
