//! Retrieval error types.

use thiserror::Error;

/// Errors from the retrieval adapter.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The vector index rejected a request.
    #[error("vector index: {0}")]
    Index(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote embedding endpoint failed or answered garbage.
    #[error("embedding: {0}")]
    Embedding(String),

    /// Payload (de)serialization failed.
    #[error("serialization: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result alias for retrieval operations.
pub type RetrievalResult<T> = Result<T, RetrievalError>;
