//! Result chunks published to the results exchange.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::{JobId, SessionId};
use crate::task::Function;

/// Kind of a result chunk. Doubles as the SSE event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultEventKind {
    /// Terminal success for a one-shot task.
    Succeeded,
    /// Terminal failure.
    Failed,
    /// A fragment of a streamed reply.
    Message,
    /// The opening AI utterance of a simulation session.
    Greeting,
    /// The streamed reply is complete.
    MessageEnd,
    /// A non-fatal error surfaced to the subscriber.
    Error,
    /// The subscriber's channel overflowed and dropped chunks.
    Lag,
    /// The conversation was closed.
    End,
    /// A concurrent turn for the same session is still generating.
    Busy,
}

impl ResultEventKind {
    /// Wire/SSE name of the event.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ResultEventKind::Succeeded => "succeeded",
            ResultEventKind::Failed => "failed",
            ResultEventKind::Message => "message",
            ResultEventKind::Greeting => "greeting",
            ResultEventKind::MessageEnd => "message_end",
            ResultEventKind::Error => "error",
            ResultEventKind::Lag => "lag",
            ResultEventKind::End => "end",
            ResultEventKind::Busy => "busy",
        }
    }
}

impl std::fmt::Display for ResultEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chunk on the results exchange.
///
/// For a given job exactly one chunk carries `final = true`, and it is the
/// last one. Subscribers deduplicate broker redeliveries with `seq`, which
/// the stream hub stamps monotonically per filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEvent {
    /// Job the chunk belongs to, when job-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    /// Session the chunk belongs to, when session-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Chunk kind.
    pub event: ResultEventKind,
    /// Chunk body: a string fragment or a structured payload.
    pub data: Value,
    /// Monotone per-filter sequence number, stamped by the hub.
    #[serde(default)]
    pub seq: u64,
    /// Whether this is the last chunk for the job.
    #[serde(rename = "final", default)]
    pub is_final: bool,
    /// Production timestamp.
    pub ts: DateTime<Utc>,
}

impl ResultEvent {
    fn new(event: ResultEventKind, data: Value, is_final: bool) -> Self {
        Self {
            job_id: None,
            session_id: None,
            event,
            data,
            seq: 0,
            is_final,
            ts: Utc::now(),
        }
    }

    /// Terminal success carrying the handler's result document.
    #[must_use]
    pub fn succeeded(job_id: JobId, result: Value) -> Self {
        Self::new(ResultEventKind::Succeeded, result, true).with_job(job_id)
    }

    /// Terminal failure carrying an error message.
    #[must_use]
    pub fn failed(job_id: JobId, error: impl Into<String>) -> Self {
        Self::new(
            ResultEventKind::Failed,
            Value::String(error.into()),
            true,
        )
        .with_job(job_id)
    }

    /// A streamed reply fragment for a session.
    #[must_use]
    pub fn message(session_id: SessionId, chunk: impl Into<String>) -> Self {
        Self::new(ResultEventKind::Message, Value::String(chunk.into()), false)
            .with_session(session_id)
    }

    /// The opening greeting of a simulation session.
    #[must_use]
    pub fn greeting(session_id: SessionId, text: impl Into<String>) -> Self {
        Self::new(ResultEventKind::Greeting, Value::String(text.into()), false)
            .with_session(session_id)
    }

    /// End-of-reply marker for a streamed turn.
    #[must_use]
    pub fn message_end(session_id: SessionId) -> Self {
        Self::new(ResultEventKind::MessageEnd, Value::Null, true).with_session(session_id)
    }

    /// Non-fatal error surfaced to subscribers.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(
            ResultEventKind::Error,
            Value::String(message.into()),
            true,
        )
    }

    /// Conversation closed.
    #[must_use]
    pub fn end(session_id: SessionId, reason: impl Into<String>) -> Self {
        Self::new(ResultEventKind::End, Value::String(reason.into()), true)
            .with_session(session_id)
    }

    /// Busy notice when a concurrent turn lost the CAS race.
    #[must_use]
    pub fn busy(session_id: SessionId) -> Self {
        Self::new(ResultEventKind::Busy, Value::Null, true).with_session(session_id)
    }

    /// Synthesized lag notice for a slow subscriber.
    #[must_use]
    pub fn lag(dropped: u64) -> Self {
        Self::new(
            ResultEventKind::Lag,
            serde_json::json!({ "dropped": dropped }),
            false,
        )
    }

    /// Attach a job id.
    #[must_use]
    pub fn with_job(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    /// Attach a session id.
    #[must_use]
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Routing key on the results exchange, `<function>.<event>`.
    #[must_use]
    pub fn routing_key(&self, function: Function) -> String {
        format!("{}.{}", function, self.event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_chunks_are_final() {
        let job = JobId::new();
        assert!(ResultEvent::succeeded(job.clone(), Value::Null).is_final);
        assert!(ResultEvent::failed(job, "boom").is_final);
        assert!(!ResultEvent::message(SessionId::new(), "hi").is_final);
    }

    #[test]
    fn routing_key_matches_exchange_convention() {
        let event = ResultEvent::failed(JobId::new(), "timeout");
        assert_eq!(event.routing_key(Function::Assist), "assist.failed");
    }

    #[test]
    fn final_serializes_under_wire_name() {
        let event = ResultEvent::message_end(SessionId::new());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["final"], true);
        assert_eq!(json["event"], "message_end");
    }

    #[test]
    fn decode_tolerates_missing_seq() {
        let json = serde_json::json!({
            "event": "message",
            "data": "hello",
            "ts": Utc::now(),
        });
        let event: ResultEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.seq, 0);
        assert!(!event.is_final);
    }
}
