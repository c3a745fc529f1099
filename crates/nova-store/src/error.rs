//! Document store error types.

use thiserror::Error;

/// Errors from the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Driver-level failure.
    #[error("mongodb: {0}")]
    Mongo(#[from] mongodb::error::Error),

    /// BSON conversion failed.
    #[error("bson: {0}")]
    Bson(#[from] mongodb::bson::ser::Error),

    /// A document id failed to parse.
    #[error("invalid document id: {0:?}")]
    InvalidId(String),

    /// A document that must exist was not found.
    #[error("document not found: {0}")]
    NotFound(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
