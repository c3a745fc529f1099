//! Document shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registered file metadata inside a vectorstore document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Uploading user.
    pub user_id: String,
    /// Sanitized filename.
    pub filename: String,
    /// SHA-256 of the file content, hex-encoded.
    pub file_hash: String,
    /// Size in bytes.
    pub file_size: u64,
    /// Upload time.
    pub uploaded_at: DateTime<Utc>,
    /// Key in the object store.
    pub object_name: String,
    /// MIME type as uploaded.
    pub content_type: String,
}

/// A conversation thread header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadDoc {
    /// Owning user.
    pub user_id: String,
    /// Thread title (prompt prefix).
    pub title: String,
    /// Worker function that created the thread.
    pub function_name: String,
    /// Simulation session, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last activity time.
    pub last_timestamp: DateTime<Utc>,
}

/// One logged turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Job that produced the turn, when job-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Owning thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Owning session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Speaker role label.
    pub role: String,
    /// Utterance or result content.
    pub content: String,
    /// Log time.
    pub timestamp: DateTime<Utc>,
}

/// Truncate a prompt into a thread title.
#[must_use]
pub fn title_from_prompt(prompt: &str, fallback: &str) -> String {
    let source = if prompt.trim().is_empty() {
        fallback
    } else {
        prompt
    };
    source.chars().take(64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_truncates_to_64_chars() {
        let long = "가".repeat(100);
        assert_eq!(title_from_prompt(&long, "assist").chars().count(), 64);
    }

    #[test]
    fn title_falls_back_for_empty_prompt() {
        assert_eq!(title_from_prompt("  ", "coach"), "coach");
    }

    #[test]
    fn file_meta_roundtrips() {
        let meta = FileMeta {
            user_id: "u1".into(),
            filename: "manual.txt".into(),
            file_hash: "ab".repeat(32),
            file_size: 42,
            uploaded_at: Utc::now(),
            object_name: "uploads/demo-org/1_manual.txt".into(),
            content_type: "text/plain".into(),
        };
        let json = serde_json::to_string(&meta).unwrap();
        let back: FileMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
