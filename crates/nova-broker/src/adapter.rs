//! Connection management, confirmed publishing and resilient consumption.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
    BasicQosOptions, BasicRejectOptions, ConfirmSelectOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use nova_core::{retry, Function, ResultEvent, RetryConfig, Task};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{BrokerError, BrokerResult};
use crate::topology::{
    self, CHAT_MESSAGES_EXCHANGE, CHAT_REQUEST_KEY, CHAT_RESPONSES_EXCHANGE, RESULTS_EXCHANGE,
    TASKS_EXCHANGE,
};

/// Cooperative shutdown flag shared between a process and its consumers.
///
/// Triggering stops new deliveries; in-flight handlers are allowed to
/// finish.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Create an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Flip the flag. Idempotent.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// A message handed to a [`MessageHandler`].
#[derive(Debug, Clone)]
pub struct DeliveredMessage {
    /// Queue the message was consumed from.
    pub queue: String,
    /// The message's routing key.
    pub routing_key: String,
    /// True when the broker redelivered after an unacked first attempt.
    /// Handlers use this to skip side effects on non-idempotent tails.
    pub redelivered: bool,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

/// Consumer callback. `Ok` acks the message; `Err` rejects it without
/// requeue, dead-lettering it for operator inspection.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one delivery.
    async fn handle(
        &self,
        message: DeliveredMessage,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// What a consumer attaches to.
enum ConsumeSource {
    /// A pre-declared durable queue.
    Durable(String),
    /// A fresh exclusive auto-delete queue bound to an exchange.
    Ephemeral {
        exchange: String,
        routing_key: String,
    },
}

/// AMQP adapter: one shared connection per process, a publish-channel pool,
/// and resilient consumers that re-declare topology after reconnect.
pub struct Broker {
    uri: String,
    prefetch: u16,
    retry: RetryConfig,
    connection: Mutex<Option<Connection>>,
    publish_channels: Mutex<Vec<Channel>>,
}

impl Broker {
    /// Connect and declare the topology.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unavailable`] when the retry budget is spent
    /// without establishing a connection, or the underlying error when
    /// topology declaration fails. Both are fatal at startup.
    pub async fn connect(uri: impl Into<String>, prefetch: u16) -> BrokerResult<Self> {
        let broker = Self {
            uri: uri.into(),
            prefetch,
            retry: RetryConfig::default(),
            connection: Mutex::new(None),
            publish_channels: Mutex::new(Vec::new()),
        };
        // Establishes the connection and declares topology as a side effect.
        drop(broker.create_channel().await?);
        Ok(broker)
    }

    /// Connect a fresh AMQP connection with backoff and declare topology.
    async fn establish(&self) -> BrokerResult<Connection> {
        let conn = retry(&self.retry, "broker connect", || {
            Connection::connect(&self.uri, ConnectionProperties::default())
        })
        .await
        .map_err(|source| BrokerError::Unavailable {
            attempts: self.retry.max_attempts,
            source,
        })?;
        let channel = conn.create_channel().await?;
        topology::declare_topology(&channel).await?;
        info!("broker connected");
        Ok(conn)
    }

    /// Create a channel on the live connection, reconnecting if needed.
    async fn create_channel(&self) -> BrokerResult<Channel> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            if conn.status().connected() {
                return Ok(conn.create_channel().await?);
            }
        }
        let conn = self.establish().await?;
        // Channels pooled from the dead connection are useless now.
        self.publish_channels.lock().await.clear();
        let channel = conn.create_channel().await?;
        *guard = Some(conn);
        Ok(channel)
    }

    /// Publishers acquire a confirmed channel from the pool; the connection
    /// itself is shared, a channel never is.
    async fn acquire_publish_channel(&self) -> BrokerResult<Channel> {
        if let Some(channel) = self.publish_channels.lock().await.pop() {
            if channel.status().connected() {
                return Ok(channel);
            }
        }
        let channel = self.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        Ok(channel)
    }

    async fn release_publish_channel(&self, channel: Channel) {
        if channel.status().connected() {
            self.publish_channels.lock().await.push(channel);
        }
    }

    /// Publish bytes with persistent delivery and a publisher confirm,
    /// retrying with exponential backoff.
    async fn publish_bytes(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> BrokerResult<()> {
        let attempts = self.retry.max_attempts;
        retry(&self.retry, "broker publish", || async {
            let channel = self.acquire_publish_channel().await?;
            let confirm = channel
                .basic_publish(
                    exchange,
                    routing_key,
                    BasicPublishOptions::default(),
                    body,
                    BasicProperties::default()
                        .with_content_type("application/json".into())
                        .with_delivery_mode(2),
                )
                .await?;
            let confirmation = confirm.await?;
            self.release_publish_channel(channel).await;
            if matches!(confirmation, Confirmation::Nack(_)) {
                return Err(BrokerError::NotConfirmed(routing_key.to_string()));
            }
            debug!(exchange, routing_key, bytes = body.len(), "published");
            Ok(())
        })
        .await
        .map_err(|err| match err {
            BrokerError::Amqp(source) => BrokerError::Unavailable { attempts, source },
            other => other,
        })
    }

    /// Publish a task envelope to the tasks exchange.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unavailable`] after retry exhaustion; the task
    /// is never half-published (publisher confirms are required).
    pub async fn publish_task(&self, task: &Task) -> BrokerResult<()> {
        let body = nova_core::to_canonical_json(task)?;
        self.publish_bytes(TASKS_EXCHANGE, &task.routing_key(), &body)
            .await
    }

    /// Publish a result chunk to the results exchange.
    ///
    /// # Errors
    ///
    /// Same semantics as [`Broker::publish_task`].
    pub async fn publish_result(
        &self,
        function: Function,
        event: &ResultEvent,
    ) -> BrokerResult<()> {
        let body = nova_core::to_canonical_json(event)?;
        self.publish_bytes(RESULTS_EXCHANGE, &event.routing_key(function), &body)
            .await
    }

    /// Publish a result chunk under an explicit routing key.
    ///
    /// Used for terminal failures where no function is known, e.g. the
    /// `task.failed` emitted for an undecodable envelope.
    ///
    /// # Errors
    ///
    /// Same semantics as [`Broker::publish_task`].
    pub async fn publish_result_with_key(
        &self,
        routing_key: &str,
        event: &ResultEvent,
    ) -> BrokerResult<()> {
        let body = nova_core::to_canonical_json(event)?;
        self.publish_bytes(RESULTS_EXCHANGE, routing_key, &body).await
    }

    /// Publish a chat turn to the simulation worker's direct exchange.
    ///
    /// # Errors
    ///
    /// Same semantics as [`Broker::publish_task`].
    pub async fn publish_chat_request(&self, task: &Task) -> BrokerResult<()> {
        let body = nova_core::to_canonical_json(task)?;
        self.publish_bytes(CHAT_MESSAGES_EXCHANGE, CHAT_REQUEST_KEY, &body)
            .await
    }

    /// Publish a chat response chunk on the fanout exchange.
    ///
    /// The routing key carries the session id as metadata only; fanout
    /// ignores it.
    ///
    /// # Errors
    ///
    /// Same semantics as [`Broker::publish_task`].
    pub async fn publish_chat_response(&self, event: &ResultEvent) -> BrokerResult<()> {
        let body = nova_core::to_canonical_json(event)?;
        let routing_key = event
            .session_id
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        self.publish_bytes(CHAT_RESPONSES_EXCHANGE, &routing_key, &body)
            .await
    }

    /// Consume a durable queue until shutdown.
    ///
    /// Reconnects transparently: unacked messages are redelivered by the
    /// broker per AMQP semantics and arrive flagged as redelivered.
    ///
    /// # Errors
    ///
    /// Only returns an error when the initial attach fails fatally; steady-
    /// state connection loss is retried internally.
    pub async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
        shutdown: &ShutdownSignal,
    ) -> BrokerResult<()> {
        self.consume_source(ConsumeSource::Durable(queue.to_string()), handler, shutdown)
            .await
    }

    /// Consume an exclusive auto-delete queue bound to `exchange`.
    ///
    /// Used by result routers: the queue exists only as long as the
    /// subscriber does.
    ///
    /// # Errors
    ///
    /// Same semantics as [`Broker::consume`].
    pub async fn consume_ephemeral(
        &self,
        exchange: &str,
        routing_key: &str,
        handler: Arc<dyn MessageHandler>,
        shutdown: &ShutdownSignal,
    ) -> BrokerResult<()> {
        self.consume_source(
            ConsumeSource::Ephemeral {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            },
            handler,
            shutdown,
        )
        .await
    }

    async fn consume_source(
        &self,
        source: ConsumeSource,
        handler: Arc<dyn MessageHandler>,
        shutdown: &ShutdownSignal,
    ) -> BrokerResult<()> {
        let mut rx = shutdown.subscribe();
        loop {
            if *rx.borrow() {
                return Ok(());
            }
            match self.consume_session(&source, handler.clone(), &mut rx).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if *rx.borrow() {
                        return Ok(());
                    }
                    warn!(error = %err, "consumer lost, reconnecting");
                    tokio::time::sleep(self.retry.base_delay).await;
                }
            }
        }
    }

    async fn consume_session(
        &self,
        source: &ConsumeSource,
        handler: Arc<dyn MessageHandler>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> BrokerResult<()> {
        let channel = self.create_channel().await?;
        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await?;

        let queue = match source {
            ConsumeSource::Durable(queue) => queue.clone(),
            ConsumeSource::Ephemeral {
                exchange,
                routing_key,
            } => {
                let queue = channel
                    .queue_declare(
                        "",
                        QueueDeclareOptions {
                            exclusive: true,
                            auto_delete: true,
                            ..QueueDeclareOptions::default()
                        },
                        FieldTable::default(),
                    )
                    .await?;
                let name = queue.name().as_str().to_string();
                channel
                    .queue_bind(
                        &name,
                        exchange,
                        routing_key,
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await?;
                name
            }
        };

        let tag = format!("nova-{}-{}", queue, Uuid::new_v4().simple());
        let mut consumer = channel
            .basic_consume(
                &queue,
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        info!(queue = %queue, consumer_tag = %tag, "consuming");

        let mut in_flight = JoinSet::new();
        let result = loop {
            tokio::select! {
                // Check shutdown before accepting new work, and drain
                // finished handlers before spawning more.
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(queue = %queue, "shutdown requested, stopping consumer");
                        break Ok(());
                    }
                }

                Some(joined) = in_flight.join_next() => {
                    if let Err(err) = joined {
                        error!(queue = %queue, error = %err, "message handler panicked");
                    }
                }

                delivery = consumer.next() => match delivery {
                    None => break Err(BrokerError::ConsumerEnded(queue.clone())),
                    Some(Err(err)) => break Err(BrokerError::Amqp(err)),
                    Some(Ok(delivery)) => {
                        let handler = handler.clone();
                        let queue = queue.clone();
                        in_flight.spawn(handle_delivery(queue, delivery, handler));
                    }
                }
            }
        };

        // Stop new deliveries, then let in-flight messages finish. The
        // process-level drain budget is enforced by the caller.
        if let Err(err) = channel.basic_cancel(&tag, BasicCancelOptions::default()).await {
            debug!(queue = %queue, error = %err, "consumer cancel failed");
        }
        while in_flight.join_next().await.is_some() {}
        result
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("prefetch", &self.prefetch)
            .finish_non_exhaustive()
    }
}

async fn handle_delivery(queue: String, mut delivery: Delivery, handler: Arc<dyn MessageHandler>) {
    let message = DeliveredMessage {
        queue: queue.clone(),
        routing_key: delivery.routing_key.as_str().to_string(),
        redelivered: delivery.redelivered,
        body: std::mem::take(&mut delivery.data),
    };
    match handler.handle(message).await {
        Ok(()) => {
            if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
                warn!(queue = %queue, error = %err, "ack failed; broker will redeliver");
            }
        }
        Err(err) => {
            warn!(queue = %queue, error = %err, "handler failed; dead-lettering");
            if let Err(err) = delivery
                .reject(BasicRejectOptions { requeue: false })
                .await
            {
                warn!(queue = %queue, error = %err, "reject failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_signal_is_sticky_and_idempotent() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());
        signal.trigger();
        signal.trigger();
        assert!(signal.is_triggered());
        let clone = signal.clone();
        assert!(clone.is_triggered());
    }

    #[test]
    fn delivered_message_exposes_redelivery() {
        let message = DeliveredMessage {
            queue: "q.assist".into(),
            routing_key: "assist.qa".into(),
            redelivered: true,
            body: b"{}".to_vec(),
        };
        assert!(message.redelivered);
        assert_eq!(message.routing_key, "assist.qa");
    }
}
