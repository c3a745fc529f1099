//! Session state: persona, phase machine, history.

use chrono::{DateTime, Utc};
use nova_core::{Persona, SessionId};
use serde::{Deserialize, Serialize};

/// Key of the serialized state in the store.
#[must_use]
pub fn session_key(session_id: &SessionId) -> String {
    format!("sim_session:{session_id}")
}

/// Key of the per-session pending-chunk list consumed by the TTS bridge.
#[must_use]
pub fn tts_queue_key(session_id: &SessionId) -> String {
    format!("tts_queue:{session_id}")
}

/// Pub/sub channel signalling that a turn's chunks are complete.
#[must_use]
pub fn tts_done_channel(session_id: &SessionId) -> String {
    format!("tts_done_flag:{session_id}")
}

/// Phase of the conversation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    /// Created, greeting not yet generated.
    New,
    /// Greeting generation in progress.
    Greeting,
    /// Idle between turns; the next seller message is accepted.
    AwaitingTurn,
    /// A turn is being generated; concurrent turns are rejected.
    Generating,
    /// Closed by the auto-close check or an explicit close.
    Closed,
}

/// Speaker of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human trainee playing the seller.
    Seller,
    /// The simulated customer.
    Ai,
}

impl Role {
    /// Display label used in prompt transcripts.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Role::Seller => "판매자",
            Role::Ai => "AI",
        }
    }
}

/// One utterance in the session transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Who spoke.
    pub role: Role,
    /// What was said.
    pub content: String,
}

impl HistoryEntry {
    /// Transcript line as fed into prompts, e.g. `판매자: 안녕하세요`.
    #[must_use]
    pub fn transcript_line(&self) -> String {
        format!("{}: {}", self.role.label(), self.content)
    }
}

/// Per-session conversational state.
///
/// `history` grows monotonically; it is never truncated except by full
/// session eviction. `version` backs the store's compare-and-set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// The session this state belongs to.
    pub session_id: SessionId,
    /// Owning user.
    pub user_id: String,
    /// Customer persona; immutable after creation.
    pub persona: Persona,
    /// Scenario key.
    pub scenario: String,
    /// Current phase of the state machine.
    pub phase: ConversationPhase,
    /// Ordered transcript.
    pub history: Vec<HistoryEntry>,
    /// Rolling compressed summary of turns evicted from the recent window.
    #[serde(default)]
    pub summary: String,
    /// Number of history entries already folded into `summary`.
    #[serde(default)]
    pub folded: usize,
    /// CAS version; bumped on every successful update.
    pub version: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last turn activity; drives TTL eviction.
    pub last_activity: DateTime<Utc>,
}

impl SessionState {
    /// Fresh state in phase [`ConversationPhase::New`].
    #[must_use]
    pub fn new(session_id: SessionId, user_id: String, persona: Persona, scenario: String) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            user_id,
            persona,
            scenario,
            phase: ConversationPhase::New,
            history: Vec::new(),
            summary: String::new(),
            folded: 0,
            version: 1,
            created_at: now,
            last_activity: now,
        }
    }

    /// Append an utterance to the transcript.
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.history.push(HistoryEntry {
            role,
            content: content.into(),
        });
    }

    /// The most recent AI utterance, if any.
    #[must_use]
    pub fn last_ai_reply(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|entry| entry.role == Role::Ai)
            .map(|entry| entry.content.as_str())
    }

    /// Full transcript, one line per utterance.
    #[must_use]
    pub fn transcript(&self) -> String {
        self.history
            .iter()
            .map(HistoryEntry::transcript_line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persona() -> Persona {
        Persona {
            age_group: "40대".into(),
            gender: "남성".into(),
            personality: "실용적".into(),
            tech: "높음".into(),
            goal: "TV 구매".into(),
            usage: "거실용".into(),
            kind: "실속형".into(),
        }
    }

    #[test]
    fn new_state_starts_in_new_phase() {
        let state = SessionState::new(SessionId::new(), "u1".into(), persona(), "intro_meeting".into());
        assert_eq!(state.phase, ConversationPhase::New);
        assert!(state.history.is_empty());
        assert_eq!(state.version, 1);
    }

    #[test]
    fn history_grows_monotonically() {
        let mut state =
            SessionState::new(SessionId::new(), "u1".into(), persona(), "intro_meeting".into());
        state.push(Role::Ai, "안녕하세요");
        state.push(Role::Seller, "어서오세요");
        state.push(Role::Ai, "TV 보러 왔어요");
        assert_eq!(state.history.len(), 3);
        assert_eq!(state.last_ai_reply(), Some("TV 보러 왔어요"));
    }

    #[test]
    fn transcript_uses_korean_labels() {
        let mut state =
            SessionState::new(SessionId::new(), "u1".into(), persona(), "intro_meeting".into());
        state.push(Role::Seller, "안녕하세요");
        assert_eq!(state.transcript(), "판매자: 안녕하세요");
    }

    #[test]
    fn state_roundtrips_through_json() {
        let mut state =
            SessionState::new(SessionId::new(), "u1".into(), persona(), "intro_meeting".into());
        state.push(Role::Ai, "반갑습니다");
        state.phase = ConversationPhase::AwaitingTurn;
        let json = serde_json::to_string(&state).unwrap();
        let back: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.phase, ConversationPhase::AwaitingTurn);
        assert_eq!(back.history, state.history);
    }

    #[test]
    fn key_helpers_embed_session_id() {
        let id = SessionId::parse("s1").unwrap();
        assert_eq!(session_key(&id), "sim_session:s1");
        assert_eq!(tts_queue_key(&id), "tts_queue:s1");
        assert_eq!(tts_done_channel(&id), "tts_done_flag:s1");
    }
}
