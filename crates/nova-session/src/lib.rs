//! Nova Session - conversational state shared between workers.
//!
//! The session store is the only shared mutable state in the fabric. All
//! mutations go through a versioned compare-and-set so that two workers
//! racing on one session cannot lose an update: after [`update_session`]
//! returns, any subsequent `get` from any node observes the new state.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod state;
pub mod store;

pub use error::{SessionError, SessionResult};
pub use memory::MemorySessionStore;
pub use redis_store::RedisSessionStore;
pub use state::{
    session_key, tts_done_channel, tts_queue_key, ConversationPhase, HistoryEntry, Role,
    SessionState,
};
pub use store::{update_session, SessionStore, SignalStream};
