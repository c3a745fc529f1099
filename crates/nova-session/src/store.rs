//! The session store contract.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::Stream;
use nova_core::SessionId;
use tracing::debug;

use crate::error::{SessionError, SessionResult};
use crate::state::SessionState;

/// Stream of pub/sub signal payloads.
pub type SignalStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Key-value store for session state with per-key TTL, atomic CAS and a
/// lightweight pub/sub used to signal chunk availability.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the state for a session, `None` when absent or expired.
    async fn get(&self, session_id: &SessionId) -> SessionResult<Option<SessionState>>;

    /// Unconditionally replace the state. Idempotent.
    async fn put(&self, state: &SessionState, ttl: Duration) -> SessionResult<()>;

    /// Store `state` only if the current version equals `expected_version`
    /// (`0` meaning "no state exists"). Returns whether the swap applied.
    async fn compare_and_put(
        &self,
        state: &SessionState,
        expected_version: u64,
        ttl: Duration,
    ) -> SessionResult<bool>;

    /// Evict a session explicitly.
    async fn delete(&self, session_id: &SessionId) -> SessionResult<()>;

    /// Publish a signal payload on a channel.
    async fn publish(&self, channel: &str, payload: &str) -> SessionResult<()>;

    /// Subscribe to a signal channel.
    async fn subscribe(&self, channel: &str) -> SessionResult<SignalStream>;

    /// Append a chunk to the session's pending-chunk list (TTS bridge).
    async fn push_chunk(&self, session_id: &SessionId, chunk: &str) -> SessionResult<()>;
}

/// Read-modify-write with optimistic concurrency.
///
/// Retries the CAS up to three times; two workers interleaving turns on one
/// session both make progress, and the loser of a race observes the winner's
/// history on its retry. `mutate` may veto the update by returning an error
/// (used for phase-transition guards), which aborts without retrying.
///
/// # Errors
///
/// [`SessionError::NotFound`] when no state exists, the mutator's error when
/// it vetoes, or [`SessionError::Conflict`] after three lost races.
pub async fn update_session<F>(
    store: &dyn SessionStore,
    session_id: &SessionId,
    ttl: Duration,
    mut mutate: F,
) -> SessionResult<SessionState>
where
    F: FnMut(&mut SessionState) -> SessionResult<()> + Send,
{
    const CAS_ATTEMPTS: u32 = 3;

    for attempt in 1..=CAS_ATTEMPTS {
        let mut state = store
            .get(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))?;
        let expected = state.version;
        mutate(&mut state)?;
        state.version = expected + 1;
        state.last_activity = Utc::now();
        if store.compare_and_put(&state, expected, ttl).await? {
            return Ok(state);
        }
        debug!(session_id = %session_id, attempt, "session CAS lost, retrying");
    }
    Err(SessionError::Conflict(session_id.clone()))
}
