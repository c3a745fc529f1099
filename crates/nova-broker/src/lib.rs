//! Nova Broker - AMQP adapter for the dispatch fabric.
//!
//! Owns connection and channel handles, never business data. Declares the
//! exchange/queue topology at startup, publishes with publisher confirms and
//! exponential backoff, and runs long-lived consumers with prefetch,
//! redelivery visibility and graceful shutdown.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod adapter;
pub mod error;
pub mod topology;

pub use adapter::{Broker, DeliveredMessage, MessageHandler, ShutdownSignal};
pub use error::{BrokerError, BrokerResult};
pub use topology::{
    CHAT_MESSAGES_EXCHANGE, CHAT_QUEUE, CHAT_REQUEST_KEY, CHAT_RESPONSES_EXCHANGE, DLQ_EXCHANGE,
    DLQ_QUEUE, QUEUE_BINDINGS, RESULTS_EXCHANGE, TASKS_EXCHANGE,
};
