//! Redis-backed session store.
//!
//! State is stored as JSON under `sim_session:{id}` with a TTL refreshed on
//! every write. The compare-and-set runs server-side as a Lua script, so
//! version comparison and the swap are atomic regardless of how many workers
//! race.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use nova_core::SessionId;
use redis::{AsyncCommands, Script};
use tracing::trace;

use crate::error::SessionResult;
use crate::state::{session_key, tts_queue_key, SessionState};
use crate::store::{SessionStore, SignalStream};

/// Compare the stored version against ARGV[1]; on match, swap in ARGV[2]
/// with TTL ARGV[3]. Expected version 0 means "create if absent".
const CAS_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if current == false then
  if ARGV[1] ~= '0' then return 0 end
else
  local state = cjson.decode(current)
  if tostring(state.version) ~= ARGV[1] then return 0 end
end
redis.call('SET', KEYS[1], ARGV[2], 'EX', tonumber(ARGV[3]))
return 1
";

/// Session store over Redis.
pub struct RedisSessionStore {
    client: redis::Client,
    manager: redis::aio::ConnectionManager,
    cas: Script,
}

impl RedisSessionStore {
    /// Connect to the store.
    ///
    /// # Errors
    ///
    /// Returns the underlying connection error; fatal at startup.
    pub async fn connect(url: &str) -> SessionResult<Self> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self {
            client,
            manager,
            cas: Script::new(CAS_SCRIPT),
        })
    }

    fn connection(&self) -> redis::aio::ConnectionManager {
        self.manager.clone()
    }
}

impl std::fmt::Debug for RedisSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSessionStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, session_id: &SessionId) -> SessionResult<Option<SessionState>> {
        let mut con = self.connection();
        let raw: Option<String> = con.get(session_key(session_id)).await?;
        match raw {
            None => Ok(None),
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        }
    }

    async fn put(&self, state: &SessionState, ttl: Duration) -> SessionResult<()> {
        let mut con = self.connection();
        let json = serde_json::to_string(state)?;
        let _: () = con
            .set_ex(session_key(&state.session_id), json, ttl.as_secs())
            .await?;
        trace!(session_id = %state.session_id, version = state.version, "session stored");
        Ok(())
    }

    async fn compare_and_put(
        &self,
        state: &SessionState,
        expected_version: u64,
        ttl: Duration,
    ) -> SessionResult<bool> {
        let mut con = self.connection();
        let json = serde_json::to_string(state)?;
        let applied: i64 = self
            .cas
            .key(session_key(&state.session_id))
            .arg(expected_version.to_string())
            .arg(json)
            .arg(ttl.as_secs())
            .invoke_async(&mut con)
            .await?;
        Ok(applied == 1)
    }

    async fn delete(&self, session_id: &SessionId) -> SessionResult<()> {
        let mut con = self.connection();
        let _: () = con.del(session_key(session_id)).await?;
        let _: () = con.del(tts_queue_key(session_id)).await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> SessionResult<()> {
        let mut con = self.connection();
        let _: () = con.publish(channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> SessionResult<SignalStream> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        let stream = pubsub
            .into_on_message()
            .map(|msg| msg.get_payload::<String>().unwrap_or_default());
        Ok(Box::pin(stream))
    }

    async fn push_chunk(&self, session_id: &SessionId, chunk: &str) -> SessionResult<()> {
        let mut con = self.connection();
        let _: () = con.lpush(tts_queue_key(session_id), chunk).await?;
        Ok(())
    }
}
