//! Opaque identifiers used across the fabric.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Error returned when parsing an identifier from text.
#[derive(Debug, Error)]
pub enum IdParseError {
    /// A job id must be 32 lowercase hex characters.
    #[error("invalid job id: expected 32 hex characters, got {0:?}")]
    InvalidJobId(String),

    /// A session id must be non-empty and contain no whitespace.
    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),
}

/// Opaque 128-bit job identifier, hex-encoded.
///
/// Allocated by the dispatcher when a task is accepted; immutable afterwards.
/// All result chunks for the task carry this id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Allocate a fresh job id, unique across the cluster.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// View the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == 32 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(IdParseError::InvalidJobId(s.to_string()))
        }
    }
}

/// Opaque identifier for a conversational session.
///
/// Created on session start and referenced by every subsequent turn. Unlike
/// [`JobId`], the format is not fixed: external callers may supply their own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Allocate a fresh session id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Wrap an externally supplied id.
    ///
    /// # Errors
    ///
    /// Returns [`IdParseError::InvalidSessionId`] if the id is empty or
    /// contains whitespace.
    pub fn parse(s: &str) -> Result<Self, IdParseError> {
        if s.is_empty() || s.chars().any(char::is_whitespace) {
            return Err(IdParseError::InvalidSessionId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// View the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_is_32_hex_chars() {
        let id = JobId::new();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn job_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn job_id_roundtrips_through_parse() {
        let id = JobId::new();
        let parsed: JobId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn job_id_rejects_garbage() {
        assert!("not-a-job-id".parse::<JobId>().is_err());
        assert!("abcd".parse::<JobId>().is_err());
    }

    #[test]
    fn session_id_rejects_whitespace() {
        assert!(SessionId::parse("").is_err());
        assert!(SessionId::parse("has space").is_err());
        assert!(SessionId::parse("fine-id_1").is_ok());
    }

    #[test]
    fn serde_is_transparent() {
        let id = JobId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}
