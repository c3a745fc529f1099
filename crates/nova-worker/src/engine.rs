//! The sales-persona conversation engine.
//!
//! One state machine per session: `NEW → GREETING → AWAITING_TURN →
//! GENERATING → CLOSED`. All state lives in the session store; the engine
//! claims a turn with a compare-and-set so concurrent workers on the same
//! session serialize, and the loser reports `busy` instead of corrupting
//! history.

use std::sync::Arc;
use std::time::Duration;

use nova_core::{
    JobId, Persona, PersonaCatalog, ResultEvent, ScenarioCatalog, SessionId, Task,
    DEFAULT_SCENARIO,
};
use nova_llm::{degraded_reply, LlmProvider};
use nova_session::{
    tts_done_channel, update_session, ConversationPhase, Role, SessionError, SessionState,
    SessionStore,
};
use nova_store::{DocumentStore, TurnRecord};
use tracing::{debug, info, warn};

use crate::error::{HandlerError, HandlerResult};
use crate::memory::HybridMemoryManager;
use crate::prompts;
use crate::runtime::{send_chunk, ChunkSink};

/// Close reason recorded when the model emits the end token.
const AUTOCLOSE_REASON: &str = "AI decided to end the conversation.";

/// Deterministic auto-close check.
///
/// Closes only once the dialogue is long enough and the latest AI reply
/// contains the end-of-conversation token. No model call in the hot path.
#[must_use]
pub fn should_autoclose(state: &SessionState) -> bool {
    state.history.len() >= prompts::MIN_DIALOGUE_LENGTH
        && state
            .last_ai_reply()
            .is_some_and(|reply| reply.contains(prompts::END_TOKEN))
}

/// The streaming sales-simulation engine.
pub struct ConversationEngine {
    store: Arc<dyn SessionStore>,
    llm: Arc<dyn LlmProvider>,
    memory: HybridMemoryManager,
    analytics: Option<Arc<DocumentStore>>,
    personas: PersonaCatalog,
    scenarios: ScenarioCatalog,
    ttl: Duration,
}

impl ConversationEngine {
    /// Wire up an engine. `analytics` is optional so tests (and degraded
    /// deployments) can run without the document store.
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        llm: Arc<dyn LlmProvider>,
        memory: HybridMemoryManager,
        analytics: Option<Arc<DocumentStore>>,
        personas: PersonaCatalog,
        scenarios: ScenarioCatalog,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            llm,
            memory,
            analytics,
            personas,
            scenarios,
            ttl,
        }
    }

    fn require_session(task: &Task) -> HandlerResult<SessionId> {
        task.session_id
            .clone()
            .ok_or_else(|| HandlerError::InvalidTask("session_id required".to_string()))
    }

    async fn log_turn(
        &self,
        job_id: Option<&JobId>,
        task: &Task,
        session_id: &SessionId,
        role: &str,
        content: &str,
    ) {
        let Some(analytics) = &self.analytics else {
            return;
        };
        let record = TurnRecord {
            job_id: job_id.map(|id| id.as_str().to_string()),
            thread_id: task.thread_id.clone(),
            session_id: Some(session_id.as_str().to_string()),
            role: role.to_string(),
            content: content.to_string(),
            timestamp: chrono::Utc::now(),
        };
        if let Err(err) = analytics.log_turn(&record).await {
            warn!(session_id = %session_id, error = %err, "turn logging failed");
        }
    }

    /// Handle `sim.start`: create the session, generate the greeting.
    ///
    /// Idempotent: a redelivered or duplicate start replays the stored
    /// greeting without a second model call.
    ///
    /// # Errors
    ///
    /// Store failures and a closed chunk channel.
    pub async fn start_session(
        &self,
        task: &Task,
        persona: Option<Persona>,
        scenario: Option<String>,
        sink: &ChunkSink,
    ) -> HandlerResult<()> {
        let session_id = Self::require_session(task)?;

        if let Some(existing) = self.store.get(&session_id).await? {
            debug!(session_id = %session_id, "session already exists, replaying greeting");
            return self.emit_greeting(task, &existing, sink).await;
        }

        let persona = persona.unwrap_or_else(|| self.personas.random());
        let scenario = scenario.unwrap_or_else(|| DEFAULT_SCENARIO.to_string());
        let mut state = SessionState::new(
            session_id.clone(),
            task.user_id.clone(),
            persona,
            scenario,
        );
        state.phase = ConversationPhase::Greeting;
        if !self.store.compare_and_put(&state, 0, self.ttl).await? {
            // A concurrent start won the race; its greeting is canonical.
            let Some(existing) = self.store.get(&session_id).await? else {
                return Err(SessionError::NotFound(session_id).into());
            };
            return self.emit_greeting(task, &existing, sink).await;
        }
        info!(session_id = %session_id, persona = %state.persona.kind, "session created");

        let scenario_description = self.scenarios.describe(&state.scenario).to_string();
        let greeting = match self
            .llm
            .complete_simple(&prompts::greeting(&state.persona, &scenario_description))
            .await
        {
            Ok(text) => prompts::clean_reply(&text),
            Err(err) => degraded_reply(&err),
        };

        let updated = update_session(self.store.as_ref(), &session_id, self.ttl, |s| {
            if s.phase == ConversationPhase::Greeting {
                s.push(Role::Ai, greeting.clone());
                s.phase = ConversationPhase::AwaitingTurn;
            }
            Ok(())
        })
        .await?;

        self.memory
            .record_utterance(&updated.user_id, Role::Ai.label(), &greeting)
            .await;
        self.log_turn(Some(&task.job_id), task, &session_id, "ai", &greeting)
            .await;
        self.emit_greeting(task, &updated, sink).await
    }

    async fn emit_greeting(
        &self,
        task: &Task,
        state: &SessionState,
        sink: &ChunkSink,
    ) -> HandlerResult<()> {
        let greeting = state.last_ai_reply().unwrap_or_default().to_string();
        send_chunk(
            sink,
            ResultEvent::greeting(state.session_id.clone(), greeting.clone())
                .with_job(task.job_id.clone()),
        )
        .await?;
        send_chunk(
            sink,
            ResultEvent::succeeded(
                task.job_id.clone(),
                serde_json::json!({ "greeting": greeting }),
            )
            .with_session(state.session_id.clone()),
        )
        .await
    }

    /// Handle one `sim.chat` turn.
    ///
    /// # Errors
    ///
    /// Store conflicts that survive the CAS retries, and a closed chunk
    /// channel. Everything recoverable is reported on the stream instead.
    pub async fn chat_turn(
        &self,
        task: &Task,
        seller_msg: &str,
        redelivered: bool,
        sink: &ChunkSink,
    ) -> HandlerResult<()> {
        let session_id = Self::require_session(task)?;

        let Some(current) = self.store.get(&session_id).await? else {
            return send_chunk(
                sink,
                ResultEvent::error("Error: Session not found or expired.")
                    .with_session(session_id)
                    .with_job(task.job_id.clone()),
            )
            .await;
        };
        if current.phase == ConversationPhase::Closed {
            return send_chunk(
                sink,
                ResultEvent::error("session is closed")
                    .with_session(session_id)
                    .with_job(task.job_id.clone()),
            )
            .await;
        }

        // Claim the turn: AWAITING_TURN → GENERATING, appending the seller
        // message in the same swap.
        let claim = update_session(self.store.as_ref(), &session_id, self.ttl, |s| {
            if s.phase == ConversationPhase::AwaitingTurn {
                s.push(Role::Seller, seller_msg.to_string());
                s.phase = ConversationPhase::Generating;
                Ok(())
            } else {
                Err(SessionError::InvalidPhase {
                    session: s.session_id.clone(),
                    actual: s.phase,
                    expected: ConversationPhase::AwaitingTurn,
                })
            }
        })
        .await;

        let state = match claim {
            Ok(state) => state,
            Err(SessionError::InvalidPhase {
                actual: ConversationPhase::Generating,
                ..
            }) => {
                return self
                    .handle_generating_conflict(task, &session_id, redelivered, sink)
                    .await;
            }
            Err(SessionError::InvalidPhase { actual, .. }) => {
                return send_chunk(
                    sink,
                    ResultEvent::error(format!("session not ready for a turn ({actual:?})"))
                        .with_session(session_id)
                        .with_job(task.job_id.clone()),
                )
                .await;
            }
            Err(err) => return Err(err.into()),
        };

        self.memory
            .record_utterance(&state.user_id, Role::Seller.label(), seller_msg)
            .await;
        self.log_turn(None, task, &session_id, "seller", seller_msg)
            .await;

        let reply = self.generate_reply(&state, seller_msg).await;

        send_chunk(
            sink,
            ResultEvent::message(session_id.clone(), reply.clone())
                .with_job(task.job_id.clone()),
        )
        .await?;
        if let Err(err) = self.store.push_chunk(&session_id, &reply).await {
            warn!(session_id = %session_id, error = %err, "chunk push failed");
        }

        // Fold the memory window against the tentative transcript so the
        // stored summary already covers the reply we are about to persist.
        let mut tentative = state.clone();
        tentative.push(Role::Ai, reply.clone());
        let (summary, folded) = self.memory.fold_overflow(&tentative).await;

        let updated = update_session(self.store.as_ref(), &session_id, self.ttl, |s| {
            if s.phase == ConversationPhase::Generating {
                s.push(Role::Ai, reply.clone());
                s.phase = ConversationPhase::AwaitingTurn;
                s.summary = summary.clone();
                s.folded = folded;
            }
            Ok(())
        })
        .await?;

        self.memory
            .record_utterance(&updated.user_id, Role::Ai.label(), &reply)
            .await;
        self.log_turn(Some(&task.job_id), task, &session_id, "ai", &reply)
            .await;
        if let Err(err) = self
            .store
            .publish(&tts_done_channel(&session_id), "done")
            .await
        {
            warn!(session_id = %session_id, error = %err, "tts signal failed");
        }

        send_chunk(
            sink,
            ResultEvent::message_end(session_id.clone()).with_job(task.job_id.clone()),
        )
        .await?;

        if should_autoclose(&updated) {
            self.close(&updated, AUTOCLOSE_REASON, sink).await?;
        }
        Ok(())
    }

    /// A turn arrived while another one is (apparently) generating.
    ///
    /// On redelivery this means a worker died mid-turn: roll the session
    /// back so the client can retry, and report the interruption. Otherwise
    /// it is a plain concurrent turn, which loses with `busy`.
    async fn handle_generating_conflict(
        &self,
        task: &Task,
        session_id: &SessionId,
        redelivered: bool,
        sink: &ChunkSink,
    ) -> HandlerResult<()> {
        if !redelivered {
            debug!(session_id = %session_id, "turn rejected, session busy");
            return send_chunk(
                sink,
                ResultEvent::busy(session_id.clone()).with_job(task.job_id.clone()),
            )
            .await;
        }
        let rollback = update_session(self.store.as_ref(), session_id, self.ttl, |s| {
            if s.phase == ConversationPhase::Generating {
                s.phase = ConversationPhase::AwaitingTurn;
            }
            Ok(())
        })
        .await;
        if let Err(err) = rollback {
            warn!(session_id = %session_id, error = %err, "rollback after redelivery failed");
        }
        info!(session_id = %session_id, "interrupted turn rolled back after redelivery");
        send_chunk(
            sink,
            ResultEvent::failed(task.job_id.clone(), "resumed")
                .with_session(session_id.clone()),
        )
        .await
    }

    async fn generate_reply(&self, state: &SessionState, seller_msg: &str) -> String {
        let scenario_description = self.scenarios.describe(&state.scenario);
        let mut prompt = prompts::customer_system(&state.persona, scenario_description);
        if !state.history.is_empty() {
            prompt.push_str("\n\n[이 세션의 대화 기록 - 반드시 참조하세요]\n");
            prompt.push_str(&state.transcript());
        }
        let context = self.memory.get_context(state, seller_msg).await;
        if !context.is_empty() {
            prompt.push_str("\n\n[추가 참조 정보]\n");
            prompt.push_str(&context);
        }
        prompt.push_str(&format!(
            "\n판매자: {seller_msg}\n\n고객 응답 (이전 대화를 완벽히 기억하며, 자연스럽게 이어가세요):"
        ));

        match self.llm.complete_simple(&prompt).await {
            Ok(text) => prompts::clean_reply(&text),
            Err(err) => {
                warn!(session_id = %state.session_id, error = %err, "reply generation failed");
                degraded_reply(&err)
            }
        }
    }

    /// Handle an explicit `sim.close`.
    ///
    /// # Errors
    ///
    /// Store failures and a closed chunk channel.
    pub async fn close_session(&self, task: &Task, sink: &ChunkSink) -> HandlerResult<()> {
        let session_id = Self::require_session(task)?;
        let Some(state) = self.store.get(&session_id).await? else {
            return send_chunk(
                sink,
                ResultEvent::failed(task.job_id.clone(), "session not found")
                    .with_session(session_id),
            )
            .await;
        };
        if state.phase != ConversationPhase::Closed {
            self.close(&state, "closed by dispatcher", sink).await?;
        }
        send_chunk(
            sink,
            ResultEvent::succeeded(task.job_id.clone(), serde_json::json!({ "closed": true }))
                .with_session(session_id),
        )
        .await
    }

    /// Transition to `CLOSED`, score the transcript, emit `end`.
    async fn close(
        &self,
        state: &SessionState,
        reason: &str,
        sink: &ChunkSink,
    ) -> HandlerResult<()> {
        let session_id = state.session_id.clone();
        let closed = update_session(self.store.as_ref(), &session_id, self.ttl, |s| {
            s.phase = ConversationPhase::Closed;
            Ok(())
        })
        .await?;
        info!(session_id = %session_id, reason, "session closed");

        // One rubric call per session, outside the turn hot path.
        let transcript = closed.transcript();
        match self
            .llm
            .complete_simple(&prompts::scoring(&transcript))
            .await
        {
            Ok(analysis) => {
                let score = prompts::extract_score(&analysis);
                info!(session_id = %session_id, score, "session scored");
                if let Some(analytics) = &self.analytics {
                    if let Err(err) = analytics
                        .record_session_score(&session_id, score, &analysis)
                        .await
                    {
                        warn!(session_id = %session_id, error = %err, "score write failed");
                    }
                }
            }
            Err(err) => warn!(session_id = %session_id, error = %err, "scoring failed"),
        }

        send_chunk(sink, ResultEvent::end(session_id, reason)).await
    }
}

impl std::fmt::Debug for ConversationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationEngine")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HybridMemoryManager;
    use nova_core::{load_scenarios, Function, ResultEventKind, TaskPayload};
    use nova_llm::ScriptedProvider;
    use nova_retrieval::{Embedder, MemoryVectorIndex};
    use nova_session::MemorySessionStore;
    use tokio::sync::mpsc;

    fn engine(llm: ScriptedProvider) -> (ConversationEngine, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::new());
        let llm = Arc::new(llm);
        let memory = HybridMemoryManager::new(
            Arc::new(MemoryVectorIndex::new()),
            Embedder::new(64, None),
            Arc::clone(&llm) as Arc<dyn LlmProvider>,
        );
        let engine = ConversationEngine::new(
            Arc::clone(&store) as Arc<dyn SessionStore>,
            llm,
            memory,
            None,
            PersonaCatalog::load(),
            load_scenarios(),
            Duration::from_secs(3600),
        );
        (engine, store)
    }

    fn task(session_id: &SessionId, payload: TaskPayload, sub: &str) -> Task {
        Task {
            job_id: JobId::new(),
            session_id: Some(session_id.clone()),
            org_id: "demo-org".into(),
            user_id: "u1".into(),
            thread_id: None,
            function: Function::Sim,
            sub_function: sub.into(),
            vectorstore_id: None,
            files: vec![],
            payload,
            created_at: chrono::Utc::now(),
            extensions: serde_json::Map::new(),
        }
    }

    async fn collect(mut rx: mpsc::Receiver<ResultEvent>) -> Vec<ResultEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    async fn start(engine: &ConversationEngine, session_id: &SessionId) -> Vec<ResultEvent> {
        let (tx, rx) = mpsc::channel(64);
        engine
            .start_session(
                &task(
                    session_id,
                    TaskPayload::SimStart {
                        persona: None,
                        scenario: None,
                    },
                    "start",
                ),
                None,
                None,
                &tx,
            )
            .await
            .unwrap();
        drop(tx);
        collect(rx).await
    }

    async fn turn(
        engine: &ConversationEngine,
        session_id: &SessionId,
        msg: &str,
        redelivered: bool,
    ) -> Vec<ResultEvent> {
        let (tx, rx) = mpsc::channel(64);
        engine
            .chat_turn(
                &task(
                    session_id,
                    TaskPayload::SimChat {
                        seller_msg: msg.into(),
                    },
                    "chat",
                ),
                msg,
                redelivered,
                &tx,
            )
            .await
            .unwrap();
        drop(tx);
        collect(rx).await
    }

    #[tokio::test]
    async fn start_emits_greeting_and_stores_history() {
        let (engine, store) = engine(ScriptedProvider::script(&["안녕하세요, 구경 좀 할게요"]));
        let session_id = SessionId::new();
        let events = start(&engine, &session_id).await;

        assert_eq!(events[0].event, ResultEventKind::Greeting);
        assert_eq!(events[0].data.as_str(), Some("안녕하세요, 구경 좀 할게요"));
        assert_eq!(events[1].event, ResultEventKind::Succeeded);
        assert!(events[1].is_final);

        let state = store.get(&session_id).await.unwrap().unwrap();
        assert_eq!(state.phase, ConversationPhase::AwaitingTurn);
        assert_eq!(state.history.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_start_replays_without_second_model_call() {
        let llm = ScriptedProvider::script(&["첫 인사"]);
        let (engine, _) = engine(llm);
        let session_id = SessionId::new();
        start(&engine, &session_id).await;
        let events = start(&engine, &session_id).await;
        assert_eq!(events[0].data.as_str(), Some("첫 인사"));
        // One greeting generation only; the replay found no scripted reply
        // left to consume and did not need one.
    }

    #[tokio::test]
    async fn full_turn_appends_seller_and_ai_to_history() {
        let (engine, store) =
            engine(ScriptedProvider::script(&["인사말", "(smile) 세탁기 보러 왔어요"]));
        let session_id = SessionId::new();
        start(&engine, &session_id).await;
        let events = turn(&engine, &session_id, "어서오세요, 무엇을 찾으세요?", false).await;

        let kinds: Vec<_> = events.iter().map(|e| e.event).collect();
        assert_eq!(
            kinds,
            vec![ResultEventKind::Message, ResultEventKind::MessageEnd]
        );
        let full: String = events
            .iter()
            .filter(|e| e.event == ResultEventKind::Message)
            .filter_map(|e| e.data.as_str())
            .collect();
        assert_eq!(full, "(smile) 세탁기 보러 왔어요");

        let state = store.get(&session_id).await.unwrap().unwrap();
        assert_eq!(state.history.len(), 3);
        assert_eq!(state.history[1].role, Role::Seller);
        assert_eq!(state.history[2].role, Role::Ai);
        assert_eq!(state.phase, ConversationPhase::AwaitingTurn);
    }

    #[tokio::test]
    async fn concurrent_turn_reports_busy() {
        let (engine, store) = engine(ScriptedProvider::script(&["인사말"]));
        let session_id = SessionId::new();
        start(&engine, &session_id).await;
        // Simulate a turn in flight.
        update_session(store.as_ref(), &session_id, Duration::from_secs(60), |s| {
            s.phase = ConversationPhase::Generating;
            Ok(())
        })
        .await
        .unwrap();

        let events = turn(&engine, &session_id, "안 바쁘세요?", false).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, ResultEventKind::Busy);
        assert!(events[0].is_final);
    }

    #[tokio::test]
    async fn redelivered_turn_rolls_back_and_reports_resumed() {
        let (engine, store) = engine(ScriptedProvider::script(&["인사말"]));
        let session_id = SessionId::new();
        start(&engine, &session_id).await;
        update_session(store.as_ref(), &session_id, Duration::from_secs(60), |s| {
            s.phase = ConversationPhase::Generating;
            Ok(())
        })
        .await
        .unwrap();

        let events = turn(&engine, &session_id, "다시 왔어요", true).await;
        assert_eq!(events[0].event, ResultEventKind::Failed);
        assert_eq!(events[0].data.as_str(), Some("resumed"));

        let state = store.get(&session_id).await.unwrap().unwrap();
        assert_eq!(state.phase, ConversationPhase::AwaitingTurn);
    }

    #[tokio::test]
    async fn vendor_failure_degrades_but_session_continues() {
        let llm = ScriptedProvider::script(&["인사말"]);
        let (engine, store) = engine(llm);
        let session_id = SessionId::new();
        start(&engine, &session_id).await;

        // No scripted reply left: the turn's completion fails.
        let events = turn(&engine, &session_id, "문의 드립니다", false).await;
        let message = events
            .iter()
            .find(|e| e.event == ResultEventKind::Message)
            .unwrap();
        assert!(message.data.as_str().unwrap().starts_with("(응답 생성 실패:"));

        let state = store.get(&session_id).await.unwrap().unwrap();
        assert_eq!(state.phase, ConversationPhase::AwaitingTurn);
    }

    #[tokio::test]
    async fn missing_session_yields_error_event() {
        let (engine, _) = engine(ScriptedProvider::new());
        let events = turn(&engine, &SessionId::new(), "안녕하세요", false).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, ResultEventKind::Error);
    }

    #[tokio::test]
    async fn autoclose_fires_on_end_token_after_enough_turns() {
        let mut replies = vec!["인사드립니다".to_string()];
        for i in 0..5 {
            replies.push(format!("응답 {i}"));
        }
        replies.push(format!("좋은 상담 감사했습니다. {}", prompts::END_TOKEN));
        replies.push("**점수**: 88/100점 분석 내용".to_string()); // scoring call
        let llm = ScriptedProvider::new();
        for reply in &replies {
            llm.push_reply(reply.clone());
        }

        let (engine, store) = engine(llm);
        let session_id = SessionId::new();
        start(&engine, &session_id).await;

        let mut last_events = Vec::new();
        for i in 0..6 {
            last_events = turn(&engine, &session_id, &format!("판매 멘트 {i}"), false).await;
        }

        let kinds: Vec<_> = last_events.iter().map(|e| e.event).collect();
        assert!(kinds.contains(&ResultEventKind::MessageEnd));
        assert!(kinds.contains(&ResultEventKind::End));

        let state = store.get(&session_id).await.unwrap().unwrap();
        assert_eq!(state.phase, ConversationPhase::Closed);
        // 1 greeting + 6 × (seller + ai)
        assert_eq!(state.history.len(), 13);

        // Further turns are rejected.
        let events = turn(&engine, &session_id, "추가 질문이요", false).await;
        assert_eq!(events[0].event, ResultEventKind::Error);
    }

    #[tokio::test]
    async fn autoclose_requires_minimum_dialogue_length() {
        let (engine, store) = engine(ScriptedProvider::script(&[
            "인사",
            &format!("바로 끝내죠 {}", prompts::END_TOKEN),
        ]));
        let session_id = SessionId::new();
        start(&engine, &session_id).await;
        let events = turn(&engine, &session_id, "안녕하세요", false).await;

        assert!(events.iter().all(|e| e.event != ResultEventKind::End));
        let state = store.get(&session_id).await.unwrap().unwrap();
        assert_eq!(state.phase, ConversationPhase::AwaitingTurn);
        assert!(!should_autoclose(&state));
    }

    #[tokio::test]
    async fn explicit_close_scores_and_ends() {
        let (engine, store) = engine(ScriptedProvider::script(&["인사", "총점: 40 아쉬운 상담"]));
        let session_id = SessionId::new();
        start(&engine, &session_id).await;

        let (tx, rx) = mpsc::channel(64);
        engine
            .close_session(&task(&session_id, TaskPayload::SimClose, "close"), &tx)
            .await
            .unwrap();
        drop(tx);
        let events = collect(rx).await;

        assert_eq!(events[0].event, ResultEventKind::End);
        assert_eq!(events[1].event, ResultEventKind::Succeeded);
        let state = store.get(&session_id).await.unwrap().unwrap();
        assert_eq!(state.phase, ConversationPhase::Closed);
    }
}
