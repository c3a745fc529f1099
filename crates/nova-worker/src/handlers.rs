//! Task handlers for each worker function.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nova_core::{neutral_persona, Function, ResultEvent, Task, TaskPayload};
use nova_llm::{degraded_reply, LlmProvider};
use nova_retrieval::RetrievalAdapter;
use nova_session::{
    update_session, ConversationPhase, Role, SessionError, SessionState, SessionStore,
};
use nova_store::{DocumentStore, TurnRecord};
use serde_json::json;
use tracing::warn;

use crate::engine::ConversationEngine;
use crate::error::{HandlerError, HandlerResult};
use crate::prompts;
use crate::runtime::{send_chunk, ChunkSink, TaskHandler};

/// Default passage count for retrieval.
const RAG_TOP_K: usize = 3;

/// Simulation handler: dispatches start/chat/close to the engine.
pub struct SimHandler {
    engine: Arc<ConversationEngine>,
}

impl SimHandler {
    /// Wrap the engine.
    #[must_use]
    pub fn new(engine: Arc<ConversationEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl TaskHandler for SimHandler {
    fn function(&self) -> Function {
        Function::Sim
    }

    async fn handle(&self, task: Task, redelivered: bool, sink: ChunkSink) -> HandlerResult<()> {
        match task.payload.clone() {
            TaskPayload::SimStart { persona, scenario } => {
                self.engine
                    .start_session(&task, persona, scenario, &sink)
                    .await
            }
            TaskPayload::SimChat { seller_msg } => {
                self.engine
                    .chat_turn(&task, &seller_msg, redelivered, &sink)
                    .await
            }
            TaskPayload::SimClose => self.engine.close_session(&task, &sink).await,
            other => Err(HandlerError::InvalidTask(format!(
                "sim worker cannot handle payload {:?}",
                other.tag()
            ))),
        }
    }
}

impl std::fmt::Debug for SimHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimHandler").finish_non_exhaustive()
    }
}

/// Retrieve-then-generate handler shared by assist, galaxy and coach.
pub struct RagHandler {
    function: Function,
    adapter: Arc<RetrievalAdapter>,
    llm: Arc<dyn LlmProvider>,
    analytics: Option<Arc<DocumentStore>>,
}

impl RagHandler {
    /// Create a handler for one of the retrieval-backed functions.
    #[must_use]
    pub fn new(
        function: Function,
        adapter: Arc<RetrievalAdapter>,
        llm: Arc<dyn LlmProvider>,
        analytics: Option<Arc<DocumentStore>>,
    ) -> Self {
        Self {
            function,
            adapter,
            llm,
            analytics,
        }
    }

    async fn log_result(&self, task: &Task, content: &str) {
        let Some(analytics) = &self.analytics else {
            return;
        };
        let record = TurnRecord {
            job_id: Some(task.job_id.as_str().to_string()),
            thread_id: task.thread_id.clone(),
            session_id: None,
            role: "ai".to_string(),
            content: content.to_string(),
            timestamp: chrono::Utc::now(),
        };
        if let Err(err) = analytics.log_turn(&record).await {
            warn!(job_id = %task.job_id, error = %err, "result logging failed");
        }
    }
}

#[async_trait]
impl TaskHandler for RagHandler {
    fn function(&self) -> Function {
        self.function
    }

    async fn handle(&self, task: Task, _redelivered: bool, sink: ChunkSink) -> HandlerResult<()> {
        let TaskPayload::Prompt { prompt, .. } = &task.payload else {
            return Err(HandlerError::InvalidTask(format!(
                "{} worker expects a prompt payload",
                self.function
            )));
        };

        let result = match (&task.vectorstore_id, prompt.trim().is_empty()) {
            (None, _) | (_, true) => json!({
                "answer": "Vector store ID and prompt are required.",
                "evidence": [],
                "sub_function": task.sub_function,
            }),
            (Some(vectorstore_id), false) => {
                match self
                    .adapter
                    .answer_with_rag(self.llm.as_ref(), prompt, vectorstore_id, RAG_TOP_K)
                    .await?
                {
                    Ok(answer) => json!({
                        "answer": answer.answer,
                        "evidence": answer.evidence,
                        "sub_function": task.sub_function,
                    }),
                    // Vendor failure: degraded answer, evidence kept empty.
                    Err(err) => json!({
                        "answer": degraded_reply(&err),
                        "evidence": [],
                        "sub_function": task.sub_function,
                    }),
                }
            }
        };

        self.log_result(&task, &result.to_string()).await;
        send_chunk(&sink, ResultEvent::succeeded(task.job_id.clone(), result)).await
    }
}

impl std::fmt::Debug for RagHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagHandler")
            .field("function", &self.function)
            .finish_non_exhaustive()
    }
}

/// Translation handler.
pub struct TranslateHandler {
    llm: Arc<dyn LlmProvider>,
}

impl TranslateHandler {
    /// Create a translation handler.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl TaskHandler for TranslateHandler {
    fn function(&self) -> Function {
        Function::Translate
    }

    async fn handle(&self, task: Task, _redelivered: bool, sink: ChunkSink) -> HandlerResult<()> {
        let TaskPayload::Translate {
            text,
            source_lang,
            target_lang,
        } = &task.payload
        else {
            return Err(HandlerError::InvalidTask(
                "translate worker expects a translate payload".to_string(),
            ));
        };

        let source = if source_lang.is_empty() {
            "the source language (detect it)".to_string()
        } else {
            source_lang.clone()
        };
        let prompt = format!(
            "Translate the following text from {source} to {target_lang}. \
             Output only the translation.\n\n{text}"
        );
        let translation = match self.llm.complete_simple(&prompt).await {
            Ok(text) => text,
            Err(err) => degraded_reply(&err),
        };

        send_chunk(
            &sink,
            ResultEvent::succeeded(
                task.job_id.clone(),
                json!({
                    "translation": translation,
                    "source_lang": source_lang,
                    "target_lang": target_lang,
                }),
            ),
        )
        .await
    }
}

impl std::fmt::Debug for TranslateHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslateHandler").finish_non_exhaustive()
    }
}

/// Persona-free chat handler: history only, markdown stripped.
pub struct ChatHandler {
    store: Arc<dyn SessionStore>,
    llm: Arc<dyn LlmProvider>,
    ttl: Duration,
}

impl ChatHandler {
    /// Create a chat handler.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, llm: Arc<dyn LlmProvider>, ttl: Duration) -> Self {
        Self { store, llm, ttl }
    }
}

#[async_trait]
impl TaskHandler for ChatHandler {
    fn function(&self) -> Function {
        Function::Chat
    }

    async fn handle(&self, task: Task, _redelivered: bool, sink: ChunkSink) -> HandlerResult<()> {
        let TaskPayload::Chat { message } = &task.payload else {
            return Err(HandlerError::InvalidTask(
                "chat worker expects a chat payload".to_string(),
            ));
        };
        let session_id = task
            .session_id
            .clone()
            .ok_or_else(|| HandlerError::InvalidTask("session_id required".to_string()))?;

        let state = match self.store.get(&session_id).await? {
            Some(state) => state,
            None => {
                let mut state = SessionState::new(
                    session_id.clone(),
                    task.user_id.clone(),
                    neutral_persona(),
                    "simple_chat".to_string(),
                );
                state.phase = ConversationPhase::AwaitingTurn;
                self.store.put(&state, self.ttl).await?;
                state
            }
        };

        let mut prompt = prompts::simple_chat_preamble().to_string();
        if !state.history.is_empty() {
            prompt.push_str("\n\n[대화 기록]\n");
            prompt.push_str(&state.transcript());
        }
        prompt.push_str(&format!("\n사용자: {message}\n챗봇:"));

        let reply = match self.llm.complete_simple(&prompt).await {
            Ok(text) => prompts::strip_markdown(&text),
            Err(err) => degraded_reply(&err),
        };

        let result = update_session(self.store.as_ref(), &session_id, self.ttl, |s| {
            s.push(Role::Seller, message.clone());
            s.push(Role::Ai, reply.clone());
            Ok(())
        })
        .await;
        if let Err(SessionError::NotFound(_)) = &result {
            // Session evicted mid-turn; the reply still goes out.
        } else {
            result?;
        }

        send_chunk(
            &sink,
            ResultEvent::message(session_id.clone(), reply.clone()).with_job(task.job_id.clone()),
        )
        .await?;
        send_chunk(
            &sink,
            ResultEvent::message_end(session_id).with_job(task.job_id.clone()),
        )
        .await
    }
}

impl std::fmt::Debug for ChatHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatHandler").finish_non_exhaustive()
    }
}

/// Dispatcher for the simulation worker process.
///
/// The process consumes both `q.sim.control` (start/close) and
/// `q.chat.messages` (turns); plain chat turns ride the same queue and are
/// forwarded to the persona-free engine.
pub struct SimWorkerHandler {
    sim: SimHandler,
    chat: ChatHandler,
}

impl SimWorkerHandler {
    /// Combine the simulation and chat handlers.
    #[must_use]
    pub fn new(sim: SimHandler, chat: ChatHandler) -> Self {
        Self { sim, chat }
    }
}

#[async_trait]
impl TaskHandler for SimWorkerHandler {
    fn function(&self) -> Function {
        Function::Sim
    }

    async fn handle(&self, task: Task, redelivered: bool, sink: ChunkSink) -> HandlerResult<()> {
        match &task.payload {
            TaskPayload::Chat { .. } => self.chat.handle(task, redelivered, sink).await,
            _ => self.sim.handle(task, redelivered, sink).await,
        }
    }
}

impl std::fmt::Debug for SimWorkerHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimWorkerHandler").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nova_core::JobId;
    use nova_llm::ScriptedProvider;
    use nova_retrieval::{Embedder, MemoryVectorIndex};
    use nova_session::MemorySessionStore;
    use tokio::sync::mpsc;

    fn rag_task(vectorstore_id: Option<&str>, prompt: &str) -> Task {
        Task {
            job_id: JobId::new(),
            session_id: None,
            org_id: "demo-org".into(),
            user_id: "u1".into(),
            thread_id: None,
            function: Function::Assist,
            sub_function: "qa".into(),
            vectorstore_id: vectorstore_id.map(ToString::to_string),
            files: vec![],
            payload: TaskPayload::Prompt {
                prompt: prompt.into(),
                params: serde_json::Map::new(),
            },
            created_at: chrono::Utc::now(),
            extensions: serde_json::Map::new(),
        }
    }

    fn rag_handler(llm: ScriptedProvider) -> RagHandler {
        RagHandler::new(
            Function::Assist,
            Arc::new(RetrievalAdapter::new(
                Arc::new(MemoryVectorIndex::new()),
                Embedder::new(64, None),
            )),
            Arc::new(llm),
            None,
        )
    }

    #[tokio::test]
    async fn rag_without_vectorstore_answers_without_model_call() {
        let llm = ScriptedProvider::script(&["unused"]);
        let handler = rag_handler(llm);
        let (tx, mut rx) = mpsc::channel(8);
        handler
            .handle(rag_task(None, "질문"), false, tx)
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert!(event.is_final);
        assert_eq!(
            event.data["answer"],
            "Vector store ID and prompt are required."
        );
    }

    #[tokio::test]
    async fn rag_empty_store_returns_canned_answer() {
        let handler = rag_handler(ScriptedProvider::script(&["unused"]));
        let (tx, mut rx) = mpsc::channel(8);
        handler
            .handle(rag_task(Some("empty"), "foo"), false, tx)
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event.data["answer"],
            nova_retrieval::NO_RELEVANT_ANSWER
        );
        assert_eq!(event.data["evidence"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn translate_produces_terminal_result() {
        let handler = TranslateHandler::new(Arc::new(ScriptedProvider::script(&["Hello"])));
        let task = Task {
            function: Function::Translate,
            sub_function: "text".into(),
            payload: TaskPayload::Translate {
                text: "안녕하세요".into(),
                source_lang: "ko".into(),
                target_lang: "en".into(),
            },
            ..rag_task(None, "")
        };
        let (tx, mut rx) = mpsc::channel(8);
        handler.handle(task, false, tx).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert!(event.is_final);
        assert_eq!(event.data["translation"], "Hello");
    }

    #[tokio::test]
    async fn chat_keeps_history_and_strips_markdown() {
        let store = Arc::new(MemorySessionStore::new());
        let handler = ChatHandler::new(
            Arc::clone(&store) as Arc<dyn SessionStore>,
            Arc::new(ScriptedProvider::script(&["**안녕하세요!**", "두 번째 응답"])),
            Duration::from_secs(3600),
        );
        let session_id = nova_core::SessionId::new();
        let mut task = rag_task(None, "");
        task.function = Function::Chat;
        task.sub_function = "message".into();
        task.session_id = Some(session_id.clone());
        task.payload = TaskPayload::Chat {
            message: "안녕".into(),
        };

        let (tx, mut rx) = mpsc::channel(8);
        handler.handle(task.clone(), false, tx).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.data.as_str(), Some("안녕하세요!"));

        let state = store.get(&session_id).await.unwrap().unwrap();
        assert_eq!(state.history.len(), 2);

        // Second turn sees the first in its prompt history.
        task.job_id = JobId::new();
        task.payload = TaskPayload::Chat {
            message: "뭐 하고 있었어?".into(),
        };
        let (tx, _rx) = mpsc::channel(8);
        handler.handle(task, false, tx).await.unwrap();
        let state = store.get(&session_id).await.unwrap().unwrap();
        assert_eq!(state.history.len(), 4);
    }
}
