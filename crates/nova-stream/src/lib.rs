//! Nova Stream - fan-in from the broker, fan-out to SSE clients.
//!
//! The [`StreamHub`] owns the subscription table: one bounded channel per
//! subscriber, keyed by a filter (a job id or a session id). The
//! [`ResultRouter`] consumes the results and chat-responses exchanges and
//! copies each chunk to every matching subscriber.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod hub;
pub mod router;

pub use hub::{StreamHub, Subscription, SUBSCRIPTION_CAPACITY};
pub use router::ResultRouter;
