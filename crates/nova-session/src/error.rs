//! Session store error types.

use nova_core::SessionId;
use thiserror::Error;

use crate::state::ConversationPhase;

/// Errors from the session store.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No state exists (or it expired) for the session.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// The compare-and-set lost three times in a row.
    #[error("concurrent update conflict on session {0}")]
    Conflict(SessionId),

    /// A phase transition was attempted from the wrong phase.
    #[error("session {session} is in phase {actual:?}, expected {expected:?}")]
    InvalidPhase {
        /// The session.
        session: SessionId,
        /// Phase found in the store.
        actual: ConversationPhase,
        /// Phase the transition requires.
        expected: ConversationPhase,
    },

    /// The session is closed; no further turns are accepted.
    #[error("session {0} is closed")]
    Closed(SessionId),

    /// Backend transport error.
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    /// State (de)serialization failed.
    #[error("serialization: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
