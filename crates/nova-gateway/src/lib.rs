//! Nova Gateway - the HTTP node of the dispatch fabric.
//!
//! Accepts requests, allocates job/session/thread ids, enqueues typed tasks,
//! and bridges result chunks back to clients over server-sent events. The
//! gateway never waits for task completion except for the sales-session
//! greeting, which it awaits on its own stream hub.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod objects;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use objects::{FsObjectStore, ObjectStore};
pub use routes::router;
pub use state::AppState;
