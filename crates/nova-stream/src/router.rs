//! Results-exchange consumer feeding the hub.

use std::sync::Arc;

use async_trait::async_trait;
use nova_broker::{
    Broker, DeliveredMessage, MessageHandler, ShutdownSignal, CHAT_RESPONSES_EXCHANGE,
    RESULTS_EXCHANGE,
};
use nova_core::ResultEvent;
use tracing::{trace, warn};

use crate::hub::StreamHub;

/// Demultiplexes result chunks by `job_id`/`session_id` into the hub.
///
/// One router per HTTP node is sufficient: it consumes an exclusive
/// auto-delete queue bound `#` to the results exchange and an ephemeral
/// queue on the chat-responses fanout, then forwards every chunk to both
/// applicable filters. Malformed payloads are logged and dropped.
pub struct ResultRouter {
    hub: Arc<StreamHub>,
}

impl ResultRouter {
    /// Create a router feeding the given hub.
    #[must_use]
    pub fn new(hub: Arc<StreamHub>) -> Self {
        Self { hub }
    }

    /// Run both consumers until shutdown.
    ///
    /// # Errors
    ///
    /// Returns the first consumer error; steady-state reconnects are handled
    /// inside the broker adapter.
    pub async fn run(self: Arc<Self>, broker: Arc<Broker>, shutdown: ShutdownSignal) -> nova_broker::BrokerResult<()> {
        let results = {
            let broker = Arc::clone(&broker);
            let handler: Arc<dyn MessageHandler> = Arc::clone(&self) as Arc<dyn MessageHandler>;
            let shutdown = shutdown.clone();
            async move {
                broker
                    .consume_ephemeral(RESULTS_EXCHANGE, "#", handler, &shutdown)
                    .await
            }
        };
        let chat = {
            let handler: Arc<dyn MessageHandler> = Arc::clone(&self) as Arc<dyn MessageHandler>;
            async move {
                broker
                    .consume_ephemeral(CHAT_RESPONSES_EXCHANGE, "", handler, &shutdown)
                    .await
            }
        };
        tokio::try_join!(results, chat)?;
        Ok(())
    }

    fn route(&self, event: &ResultEvent) {
        if let Some(job_id) = &event.job_id {
            let delivered = self.hub.publish(job_id.as_str(), event);
            trace!(job_id = %job_id, event = %event.event, delivered, "routed job chunk");
        }
        if let Some(session_id) = &event.session_id {
            let delivered = self.hub.publish(session_id.as_str(), event);
            trace!(session_id = %session_id, event = %event.event, delivered, "routed session chunk");
        }
    }
}

impl std::fmt::Debug for ResultRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultRouter").finish_non_exhaustive()
    }
}

#[async_trait]
impl MessageHandler for ResultRouter {
    async fn handle(
        &self,
        message: DeliveredMessage,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match serde_json::from_slice::<ResultEvent>(&message.body) {
            Ok(event) => self.route(&event),
            Err(err) => {
                warn!(
                    routing_key = %message.routing_key,
                    error = %err,
                    "dropping malformed result payload"
                );
            }
        }
        Ok(())
    }
}
