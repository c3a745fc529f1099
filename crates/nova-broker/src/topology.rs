//! Exchange and queue topology.
//!
//! Names and bindings are fixed; workers and the gateway must agree on them
//! byte-for-byte, so they live here and nowhere else.

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, ExchangeKind};
use tracing::info;

use crate::error::BrokerResult;

/// Topic exchange carrying task envelopes.
pub const TASKS_EXCHANGE: &str = "ai.tasks";
/// Topic exchange carrying result chunks.
pub const RESULTS_EXCHANGE: &str = "ai.results";
/// Fanout dead-letter exchange.
pub const DLQ_EXCHANGE: &str = "ai.dlq";
/// Direct exchange carrying chat turns to the simulation worker.
pub const CHAT_MESSAGES_EXCHANGE: &str = "chat.messages";
/// Fanout exchange carrying chat response chunks to subscribers.
pub const CHAT_RESPONSES_EXCHANGE: &str = "chat.responses";

/// Routing key for chat turns on [`CHAT_MESSAGES_EXCHANGE`].
pub const CHAT_REQUEST_KEY: &str = "request";
/// Durable queue the simulation worker consumes chat turns from.
pub const CHAT_QUEUE: &str = "q.chat.messages";
/// Queue collecting dead-lettered messages.
pub const DLQ_QUEUE: &str = "q.dlq";

/// Durable per-function queues and their binding patterns on
/// [`TASKS_EXCHANGE`].
pub const QUEUE_BINDINGS: [(&str, &str); 5] = [
    ("q.assist", "assist.*"),
    ("q.galaxy", "galaxy.*"),
    ("q.coach", "coach.*"),
    ("q.translate", "translate.*"),
    ("q.sim.control", "sim.*"),
];

/// Declare the full topology on the given channel.
///
/// Idempotent: safe to run on every startup and after every reconnect.
///
/// # Errors
///
/// Returns the underlying AMQP error; a persistent declare failure is fatal
/// for the process.
pub async fn declare_topology(channel: &Channel) -> BrokerResult<()> {
    let durable = ExchangeDeclareOptions {
        durable: true,
        ..ExchangeDeclareOptions::default()
    };

    channel
        .exchange_declare(TASKS_EXCHANGE, ExchangeKind::Topic, durable, FieldTable::default())
        .await?;
    channel
        .exchange_declare(RESULTS_EXCHANGE, ExchangeKind::Topic, durable, FieldTable::default())
        .await?;
    channel
        .exchange_declare(DLQ_EXCHANGE, ExchangeKind::Fanout, durable, FieldTable::default())
        .await?;
    channel
        .exchange_declare(
            CHAT_MESSAGES_EXCHANGE,
            ExchangeKind::Direct,
            durable,
            FieldTable::default(),
        )
        .await?;
    channel
        .exchange_declare(
            CHAT_RESPONSES_EXCHANGE,
            ExchangeKind::Fanout,
            durable,
            FieldTable::default(),
        )
        .await?;

    let durable_queue = QueueDeclareOptions {
        durable: true,
        ..QueueDeclareOptions::default()
    };

    // Chat turns: direct exchange, fixed routing key.
    channel
        .queue_declare(CHAT_QUEUE, durable_queue, FieldTable::default())
        .await?;
    channel
        .queue_bind(
            CHAT_QUEUE,
            CHAT_MESSAGES_EXCHANGE,
            CHAT_REQUEST_KEY,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    // Function queues dead-letter into the DLX.
    let mut dlx_args = FieldTable::default();
    dlx_args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(DLQ_EXCHANGE.into()),
    );
    for (queue, pattern) in QUEUE_BINDINGS {
        channel
            .queue_declare(queue, durable_queue, dlx_args.clone())
            .await?;
        channel
            .queue_bind(
                queue,
                TASKS_EXCHANGE,
                pattern,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
    }

    channel
        .queue_declare(DLQ_QUEUE, durable_queue, FieldTable::default())
        .await?;
    channel
        .queue_bind(
            DLQ_QUEUE,
            DLQ_EXCHANGE,
            "",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    info!("broker topology declared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nova_core::Function;

    #[test]
    fn every_task_function_has_a_bound_queue() {
        for function in Function::ALL {
            if function == Function::Chat {
                assert_eq!(function.queue(), CHAT_QUEUE);
                continue;
            }
            let (queue, pattern) = QUEUE_BINDINGS
                .iter()
                .find(|(queue, _)| *queue == function.queue())
                .copied()
                .unwrap();
            assert_eq!(queue, function.queue());
            assert!(pattern.starts_with(function.as_str()));
        }
    }

    #[test]
    fn binding_patterns_cover_sub_functions() {
        // `assist.*` style patterns match exactly `<function>.<sub>` keys.
        for (_, pattern) in QUEUE_BINDINGS {
            assert!(pattern.ends_with(".*"));
        }
    }
}
