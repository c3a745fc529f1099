//! Nova Store - persisted platform state in the document store.
//!
//! Collections:
//! - `threads`: conversation threads, one per accepted job or session
//! - `user_thread`: latest thread per user, unique on `user_id`
//! - `ai_log`: turn log, indexed on `(thread_id, timestamp)` and `job_id`
//! - `vectorstore`: file registry with a partial unique index on
//!   `files.file_hash`
//!
//! Analytics writes (turn log, session scores) land here rather than in a
//! process-local file, so any number of workers can write concurrently.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod store;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use store::DocumentStore;
pub use types::{title_from_prompt, FileMeta, ThreadDoc, TurnRecord};
