//! Retrieve-then-generate composition.

use std::sync::Arc;

use nova_llm::{LlmProvider, LlmResult, Message};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::embed::Embedder;
use crate::error::RetrievalResult;
use crate::index::{collection_name, SearchHit, VectorIndex};

/// Canned answer returned when retrieval produces no evidence.
pub const NO_RELEVANT_ANSWER: &str =
    "I couldn't find any relevant information in the provided documents.";

/// A RAG answer with its supporting evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagAnswer {
    /// Generated (or canned) answer text.
    pub answer: String,
    /// Retrieved passages backing the answer.
    pub evidence: Vec<SearchHit>,
}

/// The uniform retrieve-then-generate contract.
pub struct RetrievalAdapter {
    index: Arc<dyn VectorIndex>,
    embedder: Embedder,
}

impl RetrievalAdapter {
    /// Create an adapter over an index and embedder.
    #[must_use]
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Embedder) -> Self {
        Self { index, embedder }
    }

    /// The underlying index.
    #[must_use]
    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// The embedder.
    #[must_use]
    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    /// Retrieve the `top_k` most similar passages from a vector store.
    ///
    /// # Errors
    ///
    /// Propagates index and embedding failures.
    pub async fn retrieve(
        &self,
        vectorstore_id: &str,
        query: &str,
        top_k: usize,
    ) -> RetrievalResult<Vec<SearchHit>> {
        let collection = collection_name(vectorstore_id);
        let vector = self.embedder.embed_one(query).await?;
        let hits = self
            .index
            .search(&collection, &vector, top_k, None, None)
            .await?;
        debug!(vectorstore_id, hits = hits.len(), "retrieval complete");
        Ok(hits)
    }

    /// Answer a question against a vector store.
    ///
    /// When retrieval returns nothing the canned [`NO_RELEVANT_ANSWER`] is
    /// returned without touching the model at all.
    ///
    /// # Errors
    ///
    /// Propagates retrieval failures; model failures surface as
    /// [`nova_llm::LlmError`] wrapped into the answer by callers that prefer
    /// degraded mode.
    pub async fn answer_with_rag(
        &self,
        llm: &dyn LlmProvider,
        prompt: &str,
        vectorstore_id: &str,
        top_k: usize,
    ) -> RetrievalResult<LlmResult<RagAnswer>> {
        let evidence = self.retrieve(vectorstore_id, prompt, top_k).await?;
        if evidence.is_empty() {
            info!(vectorstore_id, "no evidence retrieved, skipping model call");
            return Ok(Ok(RagAnswer {
                answer: NO_RELEVANT_ANSWER.to_string(),
                evidence,
            }));
        }

        let context = evidence
            .iter()
            .map(|hit| {
                format!(
                    "Source: {}\nContent: {}",
                    hit.filename.as_deref().unwrap_or("unknown"),
                    hit.text
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let rag_prompt = format!(
            "Based on the following context, please provide a comprehensive answer to the \
             user's question.\nIf the context does not contain the answer, say that you cannot \
             answer based on the provided information.\n\nContext:\n---\n{context}\n---\n\n\
             Question:\n{prompt}\n\nAnswer:"
        );

        let result = llm.complete(&[Message::user(rag_prompt)]).await;
        Ok(result.map(|answer| RagAnswer { answer, evidence }))
    }
}

impl std::fmt::Debug for RetrievalAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalAdapter")
            .field("embedder", &self.embedder)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{MemoryVectorIndex, VectorPoint};
    use nova_llm::ScriptedProvider;
    use serde_json::json;
    use uuid::Uuid;

    async fn adapter_with_doc(text: &str) -> RetrievalAdapter {
        let index = Arc::new(MemoryVectorIndex::new());
        let embedder = Embedder::new(64, None);
        let vector = embedder.hash_embed(text);
        index
            .upsert(
                "vs_docs",
                vec![VectorPoint {
                    id: Uuid::new_v4().to_string(),
                    vector,
                    payload: json!({ "text": text, "filename": "manual.txt" }),
                }],
            )
            .await
            .unwrap();
        RetrievalAdapter::new(index, embedder)
    }

    #[tokio::test]
    async fn empty_store_short_circuits_without_llm_call() {
        let adapter = RetrievalAdapter::new(
            Arc::new(MemoryVectorIndex::new()),
            Embedder::new(64, None),
        );
        let llm = ScriptedProvider::script(&["should never be used"]);
        let answer = adapter
            .answer_with_rag(&llm, "foo", "empty", 3)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(answer.answer, NO_RELEVANT_ANSWER);
        assert!(answer.evidence.is_empty());
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn evidence_is_embedded_into_the_prompt() {
        let adapter = adapter_with_doc("무상 보증 기간은 2년입니다").await;
        let llm = ScriptedProvider::script(&["보증 기간은 2년입니다."]);
        let answer = adapter
            .answer_with_rag(&llm, "무상 보증 기간은?", "docs", 3)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(answer.answer, "보증 기간은 2년입니다.");
        assert_eq!(answer.evidence.len(), 1);
        let prompt = &llm.prompts()[0];
        assert!(prompt.contains("무상 보증 기간은 2년입니다"));
        assert!(prompt.contains("manual.txt"));
    }

    #[tokio::test]
    async fn retrieve_returns_ranked_hits() {
        let adapter = adapter_with_doc("갤럭시 S24 가격 정보").await;
        let hits = adapter.retrieve("docs", "갤럭시 가격", 3).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.0);
    }
}
