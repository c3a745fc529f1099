//! LLM-related error types.

use thiserror::Error;

/// Errors that can occur with LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    /// API key not configured for a remote endpoint.
    #[error("API key not configured for {provider}")]
    ApiKeyNotConfigured {
        /// Provider name.
        provider: String,
    },

    /// The request failed before a response arrived.
    #[error("API request failed: {0}")]
    ApiRequestFailed(String),

    /// The endpoint answered with a non-success status or malformed body.
    #[error("invalid API response: {0}")]
    InvalidResponse(String),

    /// The stream broke mid-reply.
    #[error("streaming error: {0}")]
    StreamingError(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The scripted provider ran out of canned replies.
    #[error("scripted provider exhausted after {0} calls")]
    ScriptExhausted(usize),
}

/// Result type for LLM operations.
pub type LlmResult<T> = Result<T, LlmError>;
