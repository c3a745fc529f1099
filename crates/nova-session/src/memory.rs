//! In-memory session store for tests and single-process development.
//!
//! Mirrors the Redis implementation's semantics (versioned CAS, pub/sub,
//! chunk lists) without a network dependency. TTLs are accepted but not
//! enforced.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use nova_core::SessionId;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::error::SessionResult;
use crate::state::SessionState;
use crate::store::{SessionStore, SignalStream};

/// In-memory [`SessionStore`].
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, SessionState>>,
    chunks: Mutex<HashMap<String, Vec<String>>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunks pushed for a session, oldest first (test observability).
    #[must_use]
    pub fn chunks_for(&self, session_id: &SessionId) -> Vec<String> {
        self.chunks
            .lock()
            .expect("chunks lock poisoned")
            .get(session_id.as_str())
            .cloned()
            .unwrap_or_default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .lock()
            .expect("channels lock poisoned")
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

impl std::fmt::Debug for MemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySessionStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &SessionId) -> SessionResult<Option<SessionState>> {
        Ok(self
            .sessions
            .lock()
            .expect("sessions lock poisoned")
            .get(session_id.as_str())
            .cloned())
    }

    async fn put(&self, state: &SessionState, _ttl: Duration) -> SessionResult<()> {
        self.sessions
            .lock()
            .expect("sessions lock poisoned")
            .insert(state.session_id.as_str().to_string(), state.clone());
        Ok(())
    }

    async fn compare_and_put(
        &self,
        state: &SessionState,
        expected_version: u64,
        _ttl: Duration,
    ) -> SessionResult<bool> {
        let mut sessions = self.sessions.lock().expect("sessions lock poisoned");
        let current_version = sessions
            .get(state.session_id.as_str())
            .map_or(0, |current| current.version);
        if current_version != expected_version {
            return Ok(false);
        }
        sessions.insert(state.session_id.as_str().to_string(), state.clone());
        Ok(true)
    }

    async fn delete(&self, session_id: &SessionId) -> SessionResult<()> {
        self.sessions
            .lock()
            .expect("sessions lock poisoned")
            .remove(session_id.as_str());
        self.chunks
            .lock()
            .expect("chunks lock poisoned")
            .remove(session_id.as_str());
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> SessionResult<()> {
        // A send error only means nobody is subscribed.
        let _ = self.sender(channel).send(payload.to_string());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> SessionResult<SignalStream> {
        let rx = self.sender(channel).subscribe();
        let stream = BroadcastStream::new(rx).filter_map(Result::ok);
        Ok(Box::pin(stream))
    }

    async fn push_chunk(&self, session_id: &SessionId, chunk: &str) -> SessionResult<()> {
        self.chunks
            .lock()
            .expect("chunks lock poisoned")
            .entry(session_id.as_str().to_string())
            .or_default()
            .push(chunk.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use crate::state::{ConversationPhase, Role};
    use crate::store::update_session;
    use nova_core::Persona;

    fn persona() -> Persona {
        Persona {
            age_group: "30대".into(),
            gender: "여성".into(),
            personality: "호기심 많음".into(),
            tech: "낮음".into(),
            goal: "스마트폰 교체".into(),
            usage: "개인용".into(),
            kind: "탐색형".into(),
        }
    }

    fn ttl() -> Duration {
        Duration::from_secs(3600)
    }

    async fn seed(store: &MemorySessionStore) -> SessionId {
        let id = SessionId::new();
        let state = SessionState::new(id.clone(), "u1".into(), persona(), "intro_meeting".into());
        store.put(&state, ttl()).await.unwrap();
        id
    }

    #[tokio::test]
    async fn get_returns_stored_state() {
        let store = MemorySessionStore::new();
        let id = seed(&store).await;
        let state = store.get(&id).await.unwrap().unwrap();
        assert_eq!(state.phase, ConversationPhase::New);
    }

    #[tokio::test]
    async fn update_bumps_version_and_applies_mutation() {
        let store = MemorySessionStore::new();
        let id = seed(&store).await;
        let updated = update_session(&store, &id, ttl(), |state| {
            state.push(Role::Seller, "안녕하세요");
            state.phase = ConversationPhase::Generating;
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.history.len(), 1);

        let fetched = store.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched.version, 2);
        assert_eq!(fetched.phase, ConversationPhase::Generating);
    }

    #[tokio::test]
    async fn second_writer_observes_first_writers_history() {
        let store = MemorySessionStore::new();
        let id = seed(&store).await;
        update_session(&store, &id, ttl(), |state| {
            state.push(Role::Seller, "첫 번째");
            Ok(())
        })
        .await
        .unwrap();
        let second = update_session(&store, &id, ttl(), |state| {
            state.push(Role::Seller, "두 번째");
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(second.history.len(), 2);
        assert_eq!(second.history[0].content, "첫 번째");
    }

    #[tokio::test]
    async fn stale_cas_is_rejected() {
        let store = MemorySessionStore::new();
        let id = seed(&store).await;
        let mut stale = store.get(&id).await.unwrap().unwrap();
        // Another writer lands first.
        update_session(&store, &id, ttl(), |state| {
            state.push(Role::Ai, "어서오세요");
            Ok(())
        })
        .await
        .unwrap();
        stale.version += 1;
        let applied = store.compare_and_put(&stale, 1, ttl()).await.unwrap();
        assert!(!applied);
    }

    #[tokio::test]
    async fn mutator_veto_aborts_without_retry() {
        let store = MemorySessionStore::new();
        let id = seed(&store).await;
        let result = update_session(&store, &id, ttl(), |state| {
            Err(SessionError::InvalidPhase {
                session: state.session_id.clone(),
                actual: state.phase,
                expected: ConversationPhase::AwaitingTurn,
            })
        })
        .await;
        assert!(matches!(result, Err(SessionError::InvalidPhase { .. })));
        // State untouched.
        assert_eq!(store.get(&id).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn update_on_missing_session_is_not_found() {
        let store = MemorySessionStore::new();
        let missing = SessionId::new();
        let result = update_session(&store, &missing, ttl(), |_| Ok(())).await;
        assert!(matches!(result, Err(SessionError::NotFound(_))));
    }

    #[tokio::test]
    async fn pubsub_delivers_signals() {
        let store = MemorySessionStore::new();
        let mut stream = store.subscribe("tts_done_flag:s1").await.unwrap();
        store.publish("tts_done_flag:s1", "done").await.unwrap();
        let payload = stream.next().await.unwrap();
        assert_eq!(payload, "done");
    }

    #[tokio::test]
    async fn chunks_accumulate_in_order() {
        let store = MemorySessionStore::new();
        let id = SessionId::new();
        store.push_chunk(&id, "첫").await.unwrap();
        store.push_chunk(&id, "둘").await.unwrap();
        assert_eq!(store.chunks_for(&id), vec!["첫", "둘"]);
    }
}
