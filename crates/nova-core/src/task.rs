//! The typed task envelope published to the task exchange.
//!
//! Payloads are tagged variants per function; unknown tags are rejected at
//! decode time. Forward-compatible fields ride in the `extensions` map.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::id::{JobId, SessionId};
use crate::persona::Persona;

/// Errors produced while building or validating a task envelope.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The function name is not one of the known set.
    #[error("unknown function: {0:?}")]
    UnknownFunction(String),

    /// The sub-function is not in the per-function whitelist.
    #[error("sub-function {sub:?} not allowed for function {function}")]
    SubFunctionNotAllowed {
        /// The offending function.
        function: Function,
        /// The rejected sub-function.
        sub: String,
    },

    /// The payload variant does not belong to the declared function.
    #[error("payload {payload:?} does not match function {function}")]
    PayloadMismatch {
        /// The declared function.
        function: Function,
        /// Tag of the mismatched payload.
        payload: &'static str,
    },

    /// `user_id` must be non-empty.
    #[error("user_id must not be empty")]
    EmptyUserId,

    /// A vectorstore id failed syntactic validation.
    #[error("invalid vectorstore id: {0:?}")]
    InvalidVectorstoreId(String),
}

/// The known worker functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Function {
    /// Document Q&A assistant.
    Assist,
    /// Course recommendation.
    Galaxy,
    /// Sales coaching Q&A.
    Coach,
    /// Translation.
    Translate,
    /// Sales-persona simulation control.
    Sim,
    /// Plain conversational chat.
    Chat,
}

impl Function {
    /// All functions, in declaration order.
    pub const ALL: [Function; 6] = [
        Function::Assist,
        Function::Galaxy,
        Function::Coach,
        Function::Translate,
        Function::Sim,
        Function::Chat,
    ];

    /// The lowercase wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Function::Assist => "assist",
            Function::Galaxy => "galaxy",
            Function::Coach => "coach",
            Function::Translate => "translate",
            Function::Sim => "sim",
            Function::Chat => "chat",
        }
    }

    /// The durable queue this function's tasks are consumed from.
    ///
    /// Chat does not ride the task exchange; its queue belongs to the
    /// `chat.messages` direct exchange.
    #[must_use]
    pub fn queue(self) -> &'static str {
        match self {
            Function::Assist => "q.assist",
            Function::Galaxy => "q.galaxy",
            Function::Coach => "q.coach",
            Function::Translate => "q.translate",
            Function::Sim => "q.sim.control",
            Function::Chat => "q.chat.messages",
        }
    }

    /// Per-function whitelist of accepted sub-functions.
    #[must_use]
    pub fn allowed_sub_functions(self) -> &'static [&'static str] {
        match self {
            Function::Assist => &["qa", "summarize"],
            Function::Galaxy => &["qa", "recommend"],
            Function::Coach => &["qa", "feedback"],
            Function::Translate => &["text"],
            Function::Sim => &["start", "chat", "close"],
            Function::Chat => &["message"],
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Function {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assist" => Ok(Function::Assist),
            "galaxy" => Ok(Function::Galaxy),
            "coach" => Ok(Function::Coach),
            "translate" => Ok(Function::Translate),
            "sim" => Ok(Function::Sim),
            "chat" => Ok(Function::Chat),
            other => Err(TaskError::UnknownFunction(other.to_string())),
        }
    }
}

/// Function-specific task payload.
///
/// The `kind` tag is rejected at decode time when unknown, so a malformed
/// producer cannot smuggle an untyped payload past the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    /// Free-form prompt for retrieve-then-generate functions.
    Prompt {
        /// The user prompt.
        prompt: String,
        /// Function-specific parameters.
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        params: Map<String, Value>,
    },

    /// Translation request.
    Translate {
        /// Source text.
        text: String,
        /// BCP-47 source language, or empty for auto-detect.
        #[serde(default)]
        source_lang: String,
        /// BCP-47 target language.
        target_lang: String,
    },

    /// Start a simulation session: generate persona + greeting.
    SimStart {
        /// Explicit persona, or none to draw a random one.
        persona: Option<Persona>,
        /// Scenario key, or none for the default.
        scenario: Option<String>,
    },

    /// One seller turn of an ongoing simulation.
    SimChat {
        /// The seller's message.
        seller_msg: String,
    },

    /// Explicit close of a simulation session.
    SimClose,

    /// Plain chat turn without persona or memory.
    Chat {
        /// The user's message.
        message: String,
    },
}

impl TaskPayload {
    /// Tag name used in error reporting.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            TaskPayload::Prompt { .. } => "prompt",
            TaskPayload::Translate { .. } => "translate",
            TaskPayload::SimStart { .. } => "sim_start",
            TaskPayload::SimChat { .. } => "sim_chat",
            TaskPayload::SimClose => "sim_close",
            TaskPayload::Chat { .. } => "chat",
        }
    }

    fn matches(&self, function: Function) -> bool {
        match self {
            TaskPayload::Prompt { .. } => matches!(
                function,
                Function::Assist | Function::Galaxy | Function::Coach
            ),
            TaskPayload::Translate { .. } => function == Function::Translate,
            TaskPayload::SimStart { .. } | TaskPayload::SimChat { .. } | TaskPayload::SimClose => {
                function == Function::Sim
            }
            TaskPayload::Chat { .. } => function == Function::Chat,
        }
    }
}

/// The envelope published to the task exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Cluster-unique job identifier.
    pub job_id: JobId,
    /// Conversational session, when the task belongs to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Tenant identifier.
    pub org_id: String,
    /// Submitting user.
    pub user_id: String,
    /// Conversation thread in the document store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Target worker function.
    pub function: Function,
    /// Sub-function within the worker.
    pub sub_function: String,
    /// Vector store to retrieve against, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vectorstore_id: Option<String>,
    /// Attached file references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    /// Function-specific payload.
    pub payload: TaskPayload,
    /// Submission timestamp.
    pub created_at: DateTime<Utc>,
    /// Forward-compatible extension fields.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl Task {
    /// The topic routing key, `<function>.<sub_function>`.
    ///
    /// A key outside the bound patterns dead-letters immediately, so the
    /// dispatcher validates before publishing.
    #[must_use]
    pub fn routing_key(&self) -> String {
        format!("{}.{}", self.function, self.sub_function)
    }

    /// Validate the envelope against the per-function rules.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule: empty `user_id`, a sub-function
    /// outside the whitelist, a payload that does not belong to the declared
    /// function, or a syntactically invalid vectorstore id.
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.user_id.trim().is_empty() {
            return Err(TaskError::EmptyUserId);
        }
        if !self
            .function
            .allowed_sub_functions()
            .contains(&self.sub_function.as_str())
        {
            return Err(TaskError::SubFunctionNotAllowed {
                function: self.function,
                sub: self.sub_function.clone(),
            });
        }
        if !self.payload.matches(self.function) {
            return Err(TaskError::PayloadMismatch {
                function: self.function,
                payload: self.payload.tag(),
            });
        }
        if let Some(vs) = &self.vectorstore_id {
            if !is_valid_vectorstore_id(vs) {
                return Err(TaskError::InvalidVectorstoreId(vs.clone()));
            }
        }
        Ok(())
    }
}

/// Syntactic check for vectorstore ids: non-empty, ASCII alphanumeric plus
/// `-` and `_`, at most 64 characters.
#[must_use]
pub fn is_valid_vectorstore_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        Task {
            job_id: JobId::new(),
            session_id: None,
            org_id: "demo-org".into(),
            user_id: "u1".into(),
            thread_id: None,
            function: Function::Assist,
            sub_function: "qa".into(),
            vectorstore_id: Some("abc123".into()),
            files: vec![],
            payload: TaskPayload::Prompt {
                prompt: "what is the warranty period?".into(),
                params: Map::new(),
            },
            created_at: Utc::now(),
            extensions: Map::new(),
        }
    }

    #[test]
    fn routing_key_is_function_dot_sub() {
        assert_eq!(sample_task().routing_key(), "assist.qa");
    }

    #[test]
    fn validate_accepts_well_formed_task() {
        sample_task().validate().unwrap();
    }

    #[test]
    fn validate_rejects_empty_user() {
        let mut task = sample_task();
        task.user_id = "  ".into();
        assert!(matches!(task.validate(), Err(TaskError::EmptyUserId)));
    }

    #[test]
    fn validate_rejects_unlisted_sub_function() {
        let mut task = sample_task();
        task.sub_function = "rm-rf".into();
        assert!(matches!(
            task.validate(),
            Err(TaskError::SubFunctionNotAllowed { .. })
        ));
    }

    #[test]
    fn validate_rejects_cross_function_payload() {
        let mut task = sample_task();
        task.payload = TaskPayload::SimChat {
            seller_msg: "안녕하세요".into(),
        };
        assert!(matches!(
            task.validate(),
            Err(TaskError::PayloadMismatch { .. })
        ));
    }

    #[test]
    fn validate_rejects_bad_vectorstore_id() {
        let mut task = sample_task();
        task.vectorstore_id = Some("../etc/passwd".into());
        assert!(matches!(
            task.validate(),
            Err(TaskError::InvalidVectorstoreId(_))
        ));
    }

    #[test]
    fn unknown_payload_tag_is_rejected() {
        let err = serde_json::from_value::<TaskPayload>(serde_json::json!({
            "kind": "evil_variant",
            "data": 1
        }));
        assert!(err.is_err());
    }

    #[test]
    fn envelope_roundtrips_through_json() {
        let task = sample_task();
        let bytes = crate::to_canonical_json(&task).unwrap();
        let back: Task = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.job_id, task.job_id);
        assert_eq!(back.payload, task.payload);
        assert_eq!(back.routing_key(), task.routing_key());
    }

    #[test]
    fn function_parses_from_wire_name() {
        for function in Function::ALL {
            assert_eq!(function.as_str().parse::<Function>().unwrap(), function);
        }
        assert!("nope".parse::<Function>().is_err());
    }
}
