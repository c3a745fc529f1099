//! Worker error types.

use thiserror::Error;

/// Errors surfaced by task handlers.
///
/// Handler failures are policy "fail fast, report": the runtime publishes a
/// `task.failed` result and acks; the operator may replay from the DLQ.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Session store failure.
    #[error(transparent)]
    Session(#[from] nova_session::SessionError),

    /// Model failure that could not be degraded.
    #[error(transparent)]
    Llm(#[from] nova_llm::LlmError),

    /// Retrieval failure.
    #[error(transparent)]
    Retrieval(#[from] nova_retrieval::RetrievalError),

    /// Document store failure.
    #[error(transparent)]
    Store(#[from] nova_store::StoreError),

    /// The runtime's chunk channel closed under the handler.
    #[error("chunk channel closed")]
    ChannelClosed,

    /// The task is missing a field its function requires.
    #[error("invalid task: {0}")]
    InvalidTask(String),
}

/// Result alias for handler operations.
pub type HandlerResult<T> = Result<T, HandlerError>;
