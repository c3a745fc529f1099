//! The worker runtime: consumes one queue, runs a handler, publishes chunks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nova_broker::{Broker, DeliveredMessage, MessageHandler, ShutdownSignal};
use nova_core::{Function, ResultEvent, Task};
use nova_session::{update_session, ConversationPhase, SessionStore};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::error::{HandlerError, HandlerResult};

/// Channel capacity between a handler and the forwarding loop.
const CHUNK_BUFFER: usize = 32;

/// Where handlers push their chunks. The final chunk must carry
/// `final = true`; closing the channel without one is treated as a handler
/// bug and reported as a failure.
pub type ChunkSink = mpsc::Sender<ResultEvent>;

/// A pluggable task handler.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The function this handler serves.
    fn function(&self) -> Function;

    /// Process one task, pushing chunks into `sink`.
    ///
    /// `redelivered` is true when the broker redelivered the task after an
    /// unacked first attempt; handlers skip non-idempotent side effects in
    /// that case.
    async fn handle(&self, task: Task, redelivered: bool, sink: ChunkSink) -> HandlerResult<()>;
}

/// Consumes a queue and drives a [`TaskHandler`].
///
/// Per message: decode, run the handler under the hard per-turn timeout,
/// forward every chunk to the results fabric, and report failures as
/// `task.failed` (ack, no requeue).
pub struct WorkerRuntime {
    broker: Arc<Broker>,
    handler: Arc<dyn TaskHandler>,
    sessions: Option<Arc<dyn SessionStore>>,
    handler_timeout: Duration,
    session_ttl: Duration,
}

impl WorkerRuntime {
    /// Create a runtime for one handler.
    #[must_use]
    pub fn new(
        broker: Arc<Broker>,
        handler: Arc<dyn TaskHandler>,
        handler_timeout: Duration,
        session_ttl: Duration,
    ) -> Self {
        Self {
            broker,
            handler,
            sessions: None,
            handler_timeout,
            session_ttl,
        }
    }

    /// Attach a session store so the runtime can roll a session back to
    /// `AWAITING_TURN` when a turn times out.
    #[must_use]
    pub fn with_sessions(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Consume `queue` until shutdown.
    ///
    /// # Errors
    ///
    /// Propagates a fatal initial attach failure from the broker.
    pub async fn run(
        self: Arc<Self>,
        queue: &str,
        shutdown: &ShutdownSignal,
    ) -> nova_broker::BrokerResult<()> {
        info!(queue, function = %self.handler.function(), "worker runtime starting");
        let broker = Arc::clone(&self.broker);
        // The broker adapter owns ack/reject and the shutdown drain.
        let handler: Arc<dyn MessageHandler> = self;
        broker.consume(queue, handler, shutdown).await
    }

    /// Publish every chunk the handler produces.
    ///
    /// Chunks with a session id ride the chat-responses fanout (the sales
    /// stream); terminal succeeded/failed chunks always ride the results
    /// exchange so job subscribers observe them too.
    async fn forward_chunks(
        &self,
        function: Function,
        rx: &mut mpsc::Receiver<ResultEvent>,
    ) -> Result<bool, nova_broker::BrokerError> {
        let mut saw_final = false;
        while let Some(event) = rx.recv().await {
            saw_final |= event.is_final;
            let terminal = matches!(
                event.event,
                nova_core::ResultEventKind::Succeeded | nova_core::ResultEventKind::Failed
            );
            if event.session_id.is_some() && !terminal {
                self.broker.publish_chat_response(&event).await?;
            } else {
                self.broker.publish_result(function, &event).await?;
            }
        }
        Ok(saw_final)
    }

    async fn publish_failure(&self, task: &Task, error: &str) {
        let event = match &task.session_id {
            Some(session_id) => ResultEvent::failed(task.job_id.clone(), error)
                .with_session(session_id.clone()),
            None => ResultEvent::failed(task.job_id.clone(), error),
        };
        if let Err(err) = self.broker.publish_result(task.function, &event).await {
            error!(job_id = %task.job_id, error = %err, "failed to publish task.failed");
        }
    }

    /// On a timed-out turn, move the session out of `GENERATING` so the
    /// next turn is accepted.
    async fn recover_session(&self, task: &Task) {
        let (Some(sessions), Some(session_id)) = (&self.sessions, &task.session_id) else {
            return;
        };
        let result = update_session(sessions.as_ref(), session_id, self.session_ttl, |state| {
            if state.phase == ConversationPhase::Generating {
                state.phase = ConversationPhase::AwaitingTurn;
            }
            Ok(())
        })
        .await;
        if let Err(err) = result {
            warn!(session_id = %session_id, error = %err, "session recovery failed");
        }
    }
}

impl std::fmt::Debug for WorkerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRuntime")
            .field("function", &self.handler.function())
            .field("handler_timeout", &self.handler_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MessageHandler for WorkerRuntime {
    async fn handle(
        &self,
        message: DeliveredMessage,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // Malformed JSON is terminal: report and ack so it never requeues.
        let task: Task = match serde_json::from_slice(&message.body) {
            Ok(task) => task,
            Err(err) => {
                warn!(
                    queue = %message.queue,
                    routing_key = %message.routing_key,
                    error = %err,
                    "undecodable task envelope"
                );
                let event = ResultEvent::error(json!({
                    "error": "invalid_json",
                    "detail": err.to_string(),
                })
                .to_string());
                self.broker
                    .publish_result_with_key("task.failed", &event)
                    .await?;
                return Ok(());
            }
        };

        let job_id = task.job_id.clone();
        let function = task.function;
        let (tx, mut rx) = mpsc::channel(CHUNK_BUFFER);
        let handler = Arc::clone(&self.handler);
        let handler_task = task.clone();
        let redelivered = message.redelivered;

        let handler_fut = timeout(
            self.handler_timeout,
            handler.handle(handler_task, redelivered, tx),
        );
        let forward_fut = self.forward_chunks(function, &mut rx);

        let (handler_result, forward_result) = tokio::join!(handler_fut, forward_fut);
        let saw_final = forward_result?;

        match handler_result {
            Ok(Ok(())) => {
                if !saw_final {
                    warn!(job_id = %job_id, "handler finished without a terminal chunk");
                    self.publish_failure(&task, "handler produced no terminal chunk")
                        .await;
                }
            }
            Ok(Err(err)) => {
                warn!(job_id = %job_id, error = %err, "handler failed");
                self.publish_failure(&task, &err.to_string()).await;
            }
            Err(_) => {
                warn!(
                    job_id = %job_id,
                    timeout_secs = self.handler_timeout.as_secs(),
                    "handler timed out"
                );
                self.publish_failure(&task, "timeout").await;
                self.recover_session(&task).await;
            }
        }
        Ok(())
    }
}

/// Convenience used by engine code: push a chunk, mapping a closed channel
/// to [`HandlerError::ChannelClosed`].
pub async fn send_chunk(sink: &ChunkSink, event: ResultEvent) -> HandlerResult<()> {
    sink.send(event)
        .await
        .map_err(|_| HandlerError::ChannelClosed)
}
