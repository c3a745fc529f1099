//! Nova Worker - queue consumers and their task handlers.
//!
//! One process serves one function: it opens a channel with the configured
//! prefetch, decodes task envelopes, runs the function's handler under the
//! per-turn timeout, and publishes result chunks back into the fabric. The
//! simulation worker additionally consumes the chat-turn queue and keeps all
//! conversational state in the session store.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod engine;
pub mod error;
pub mod handlers;
pub mod memory;
pub mod prompts;
pub mod runtime;

pub use engine::{should_autoclose, ConversationEngine};
pub use error::{HandlerError, HandlerResult};
pub use handlers::{ChatHandler, RagHandler, SimHandler, SimWorkerHandler, TranslateHandler};
pub use memory::HybridMemoryManager;
pub use runtime::{send_chunk, ChunkSink, TaskHandler, WorkerRuntime};
