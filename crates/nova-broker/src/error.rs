//! Broker error types.

use thiserror::Error;

/// Errors from the AMQP adapter.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Connection could not be (re)established within the retry budget.
    #[error("broker unavailable after {attempts} attempts: {source}")]
    Unavailable {
        /// Attempts made before giving up.
        attempts: u32,
        /// The final connection error.
        #[source]
        source: lapin::Error,
    },

    /// Underlying protocol error.
    #[error("AMQP: {0}")]
    Amqp(#[from] lapin::Error),

    /// The broker nacked a confirmed publish.
    #[error("publish not confirmed on routing key {0:?}")]
    NotConfirmed(String),

    /// Payload serialization failed.
    #[error("serialization: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The consumer's delivery stream ended unexpectedly.
    #[error("consumer stream ended for queue {0:?}")]
    ConsumerEnded(String),
}

/// Result alias for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;
