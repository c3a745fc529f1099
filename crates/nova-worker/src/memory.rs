//! Hybrid conversation memory: recent window + rolling summary + vector
//! recall.
//!
//! The recent window and summary live inside the session state (so they
//! survive worker restarts); only salient utterances are written to the
//! shared vector collection.

use std::sync::Arc;

use nova_llm::LlmProvider;
use nova_retrieval::{Embedder, VectorIndex, VectorPoint};
use nova_session::{HistoryEntry, SessionState};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::prompts;

/// Shared vector collection for conversation memory.
pub const MEMORY_COLLECTION: &str = "sales-persona-memory";

/// How many recent utterances go into the context verbatim.
pub const RECENT_WINDOW: usize = 5;

/// Recent-buffer size; older entries fold into the summary.
pub const MAX_RECENT_MESSAGES: usize = 10;

/// Summary length that triggers LLM compression.
pub const SUMMARY_COMPRESS_THRESHOLD: usize = 500;

/// Cosine similarity floor for vector recall.
pub const SIMILARITY_THRESHOLD: f32 = 0.7;

/// Only utterances touching one of these topics are worth indexing.
const SALIENCE_KEYWORDS: [&str; 26] = [
    "예산", "가격", "할인", "결정", "구매", "고민", "선호", "경험", "문제", "요구사항", "조건",
    "제품명", "모델", "갤럭시", "비스포크", "QLED", "스마트싱스", "워치", "북", "불만", "만족",
    "추천", "비교", "성능", "디자인", "보증",
];

/// Conversation-level memory manager.
pub struct HybridMemoryManager {
    index: Arc<dyn VectorIndex>,
    embedder: Embedder,
    llm: Arc<dyn LlmProvider>,
}

impl HybridMemoryManager {
    /// Create a manager over the shared index.
    #[must_use]
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Embedder, llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            index,
            embedder,
            llm,
        }
    }

    /// Ensure the memory collection exists.
    ///
    /// # Errors
    ///
    /// Propagates index failures; callers treat this as fatal at startup.
    pub async fn init(&self) -> nova_retrieval::RetrievalResult<()> {
        self.index
            .ensure_collection(MEMORY_COLLECTION, self.embedder.dim())
            .await
    }

    /// Whether an utterance carries purchase-relevant information.
    #[must_use]
    pub fn is_salient(text: &str) -> bool {
        SALIENCE_KEYWORDS.iter().any(|keyword| text.contains(keyword))
    }

    /// Index an utterance when salient. Failures are logged and swallowed:
    /// memory loss degrades quality, not correctness.
    pub async fn record_utterance(&self, user_id: &str, role_label: &str, content: &str) {
        if !Self::is_salient(content) {
            return;
        }
        let vector = match self.embedder.embed_one(content).await {
            Ok(vector) => vector,
            Err(err) => {
                warn!(error = %err, "memory embedding failed");
                return;
            }
        };
        let point = VectorPoint {
            id: Uuid::new_v4().to_string(),
            vector,
            payload: json!({
                "user_id": user_id,
                "role": role_label,
                "content": content,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }),
        };
        if let Err(err) = self.index.upsert(MEMORY_COLLECTION, vec![point]).await {
            warn!(error = %err, "memory upsert failed");
        }
    }

    /// Compose the context block for the next prompt: the last five
    /// utterances, the rolling summary, and up to three recalled utterances
    /// above the similarity floor.
    pub async fn get_context(&self, state: &SessionState, current_message: &str) -> String {
        let mut parts: Vec<String> = Vec::new();

        let recent: Vec<String> = state
            .history
            .iter()
            .rev()
            .take(RECENT_WINDOW)
            .map(HistoryEntry::transcript_line)
            .collect();
        if !recent.is_empty() {
            let recent = recent.into_iter().rev().collect::<Vec<_>>().join("\n");
            parts.push(format!("[최근 대화]\n{recent}"));
        }

        if !state.summary.is_empty() {
            parts.push(format!("[이전 대화 요약]\n{}", state.summary));
        }

        match self.embedder.embed_one(current_message).await {
            Ok(vector) => {
                match self
                    .index
                    .search(
                        MEMORY_COLLECTION,
                        &vector,
                        3,
                        Some(SIMILARITY_THRESHOLD),
                        Some(("user_id", &state.user_id)),
                    )
                    .await
                {
                    Ok(hits) if !hits.is_empty() => {
                        let recalled = hits
                            .iter()
                            .map(|hit| {
                                let role = hit
                                    .payload
                                    .get("role")
                                    .and_then(serde_json::Value::as_str)
                                    .unwrap_or("AI");
                                let content = hit
                                    .payload
                                    .get("content")
                                    .and_then(serde_json::Value::as_str)
                                    .unwrap_or_default();
                                format!("{role}: {content}")
                            })
                            .collect::<Vec<_>>()
                            .join("\n");
                        parts.push(format!("[관련 이전 정보]\n{recalled}"));
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "memory recall failed"),
                }
            }
            Err(err) => warn!(error = %err, "query embedding failed"),
        }

        parts.join("\n\n")
    }

    /// Fold history that left the recent buffer into the summary and return
    /// the updated `(summary, folded)` pair.
    ///
    /// When the summary outgrows the threshold it is compressed with one
    /// model call; a failed compression keeps the uncompressed text.
    pub async fn fold_overflow(&self, state: &SessionState) -> (String, usize) {
        let mut summary = state.summary.clone();
        let mut folded = state.folded;
        while state.history.len().saturating_sub(folded) > MAX_RECENT_MESSAGES {
            let entry = &state.history[folded];
            let snippet: String = entry.content.chars().take(100).collect();
            let snippet = format!("{}: {snippet}...", entry.role.label());
            if summary.is_empty() {
                summary = snippet;
            } else {
                summary = format!("{summary} | {snippet}");
            }
            folded += 1;
        }
        if summary.chars().count() > SUMMARY_COMPRESS_THRESHOLD {
            match self
                .llm
                .complete_simple(&prompts::summary_compress(&summary))
                .await
            {
                Ok(compressed) => {
                    debug!("summary compressed");
                    summary = compressed;
                }
                Err(err) => warn!(error = %err, "summary compression failed"),
            }
        }
        (summary, folded)
    }
}

impl std::fmt::Debug for HybridMemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridMemoryManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nova_core::{Persona, SessionId};
    use nova_llm::ScriptedProvider;
    use nova_retrieval::MemoryVectorIndex;
    use nova_session::Role;

    fn persona() -> Persona {
        Persona {
            age_group: "30대".into(),
            gender: "남성".into(),
            personality: "실용적".into(),
            tech: "높음".into(),
            goal: "노트북 구매".into(),
            usage: "업무".into(),
            kind: "효율중시형".into(),
        }
    }

    fn manager_with(llm: ScriptedProvider) -> HybridMemoryManager {
        HybridMemoryManager::new(
            Arc::new(MemoryVectorIndex::new()),
            Embedder::new(64, None),
            Arc::new(llm),
        )
    }

    fn state_with_turns(turns: &[(&str, Role)]) -> SessionState {
        let mut state = SessionState::new(
            SessionId::new(),
            "u1".into(),
            persona(),
            "intro_meeting".into(),
        );
        for (content, role) in turns {
            state.push(*role, *content);
        }
        state
    }

    #[test]
    fn salience_gates_on_keywords() {
        assert!(HybridMemoryManager::is_salient("예산은 100만원입니다"));
        assert!(HybridMemoryManager::is_salient("갤럭시 북이 좋아요"));
        assert!(!HybridMemoryManager::is_salient("네 알겠습니다"));
    }

    #[tokio::test]
    async fn only_salient_utterances_are_indexed() {
        let manager = manager_with(ScriptedProvider::new());
        manager.record_utterance("u1", "판매자", "가격이 궁금해요").await;
        manager.record_utterance("u1", "AI", "네 반갑습니다").await;
        let hits = manager
            .index
            .search(
                MEMORY_COLLECTION,
                &manager.embedder.hash_embed("가격이 궁금해요"),
                10,
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn context_contains_recent_and_summary_sections() {
        let manager = manager_with(ScriptedProvider::new());
        let mut state = state_with_turns(&[
            ("안녕하세요", Role::Ai),
            ("어서오세요", Role::Seller),
        ]);
        state.summary = "고객은 예산 100만원을 언급함".into();
        let context = manager.get_context(&state, "할인 되나요?").await;
        assert!(context.contains("[최근 대화]"));
        assert!(context.contains("어서오세요"));
        assert!(context.contains("[이전 대화 요약]"));
    }

    #[tokio::test]
    async fn recall_is_scoped_to_the_user() {
        let manager = manager_with(ScriptedProvider::new());
        manager.record_utterance("other", "판매자", "예산은 300만원").await;
        let state = state_with_turns(&[("안녕하세요", Role::Ai)]);
        let context = manager.get_context(&state, "예산은 300만원").await;
        assert!(!context.contains("[관련 이전 정보]"));
    }

    #[tokio::test]
    async fn overflow_folds_into_summary() {
        let manager = manager_with(ScriptedProvider::new());
        let turns: Vec<(String, Role)> = (0..14)
            .map(|i| (format!("발화 {i}"), if i % 2 == 0 { Role::Seller } else { Role::Ai }))
            .collect();
        let mut state = state_with_turns(&[]);
        for (content, role) in &turns {
            state.push(*role, content.clone());
        }
        let (summary, folded) = manager.fold_overflow(&state).await;
        assert_eq!(folded, 4);
        assert!(summary.contains("발화 0"));
        assert!(summary.contains("발화 3"));
        assert!(!summary.contains("발화 5"));
    }

    #[tokio::test]
    async fn long_summary_is_compressed_by_the_model() {
        let llm = ScriptedProvider::script(&["압축된 요약"]);
        let manager = manager_with(llm);
        let mut state = state_with_turns(&[]);
        state.summary = "아".repeat(600);
        let (summary, _) = manager.fold_overflow(&state).await;
        assert_eq!(summary, "압축된 요약");
    }
}
