//! Uniform contract over the external vector index.
//!
//! The index is addressed over its HTTP API; one collection per vector
//! store, named `vs_<id>`, cosine distance throughout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{RetrievalError, RetrievalResult};

/// Collection name for a vector store id.
#[must_use]
pub fn collection_name(vectorstore_id: &str) -> String {
    format!("vs_{vectorstore_id}")
}

/// A point to upsert. `id` must be a UUID string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPoint {
    /// UUID point id.
    pub id: String,
    /// Embedding vector.
    pub vector: Vec<f32>,
    /// Arbitrary payload stored with the point.
    pub payload: Value,
}

/// A search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Cosine similarity score.
    pub score: f32,
    /// Text payload of the hit, when present.
    pub text: String,
    /// Source filename, when present.
    pub filename: Option<String>,
    /// Full payload for callers that need more fields.
    pub payload: Value,
}

impl SearchHit {
    fn from_payload(score: f32, payload: Value) -> Self {
        let text = payload
            .get("text")
            .or_else(|| payload.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let filename = payload
            .get("filename")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        Self {
            score,
            text,
            filename,
            payload,
        }
    }
}

/// Vector index operations used by the fabric.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if absent (cosine distance, `dim` size).
    async fn ensure_collection(&self, collection: &str, dim: usize) -> RetrievalResult<()>;

    /// Upsert points.
    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> RetrievalResult<()>;

    /// Nearest-neighbor search with optional score threshold and a single
    /// payload equality filter.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        score_threshold: Option<f32>,
        payload_filter: Option<(&str, &str)>,
    ) -> RetrievalResult<Vec<SearchHit>>;

    /// Delete every point whose payload matches `key == value`.
    async fn delete_by_payload(
        &self,
        collection: &str,
        key: &str,
        value: &str,
    ) -> RetrievalResult<()>;

    /// Drop a collection entirely.
    async fn drop_collection(&self, collection: &str) -> RetrievalResult<()>;
}

/// HTTP client for the index.
pub struct HttpVectorIndex {
    base_url: String,
    client: reqwest::Client,
}

impl HttpVectorIndex {
    /// Create a client for the given base URL, e.g. `http://qdrant:6333`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    async fn check(response: reqwest::Response, context: &str) -> RetrievalResult<Value> {
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(RetrievalError::Index(format!(
                "{context}: HTTP {status}: {body}"
            )));
        }
        Ok(body)
    }
}

impl std::fmt::Debug for HttpVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpVectorIndex")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn ensure_collection(&self, collection: &str, dim: usize) -> RetrievalResult<()> {
        let exists = self
            .client
            .get(self.url(&format!("/collections/{collection}")))
            .send()
            .await?
            .status()
            .is_success();
        if exists {
            return Ok(());
        }
        let response = self
            .client
            .put(self.url(&format!("/collections/{collection}")))
            .json(&json!({ "vectors": { "size": dim, "distance": "Cosine" } }))
            .send()
            .await?;
        Self::check(response, "create collection").await?;
        debug!(collection, dim, "collection created");
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> RetrievalResult<()> {
        if points.is_empty() {
            return Ok(());
        }
        let response = self
            .client
            .put(self.url(&format!("/collections/{collection}/points?wait=true")))
            .json(&json!({ "points": points }))
            .send()
            .await?;
        Self::check(response, "upsert points").await?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        score_threshold: Option<f32>,
        payload_filter: Option<(&str, &str)>,
    ) -> RetrievalResult<Vec<SearchHit>> {
        let mut request = json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true,
        });
        if let Some(threshold) = score_threshold {
            request["score_threshold"] = json!(threshold);
        }
        if let Some((key, value)) = payload_filter {
            request["filter"] = json!({
                "must": [{ "key": key, "match": { "value": value } }]
            });
        }
        let response = self
            .client
            .post(self.url(&format!("/collections/{collection}/points/search")))
            .json(&request)
            .send()
            .await?;
        let body = Self::check(response, "search").await?;
        let hits = body
            .get("result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(hits
            .into_iter()
            .map(|hit| {
                let score = hit.get("score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
                let payload = hit.get("payload").cloned().unwrap_or(Value::Null);
                SearchHit::from_payload(score, payload)
            })
            .collect())
    }

    async fn delete_by_payload(
        &self,
        collection: &str,
        key: &str,
        value: &str,
    ) -> RetrievalResult<()> {
        let response = self
            .client
            .post(self.url(&format!("/collections/{collection}/points/delete?wait=true")))
            .json(&json!({
                "filter": { "must": [{ "key": key, "match": { "value": value } }] }
            }))
            .send()
            .await?;
        Self::check(response, "delete by payload").await?;
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> RetrievalResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("/collections/{collection}")))
            .send()
            .await?;
        Self::check(response, "drop collection").await?;
        Ok(())
    }
}

/// In-memory index with real cosine scoring, for tests and development.
#[derive(Default)]
pub struct MemoryVectorIndex {
    collections: std::sync::Mutex<std::collections::HashMap<String, Vec<VectorPoint>>>,
}

impl MemoryVectorIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of points in a collection (test observability).
    #[must_use]
    pub fn point_count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .expect("collections lock poisoned")
            .get(collection)
            .map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for MemoryVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryVectorIndex").finish_non_exhaustive()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn ensure_collection(&self, collection: &str, _dim: usize) -> RetrievalResult<()> {
        self.collections
            .lock()
            .expect("collections lock poisoned")
            .entry(collection.to_string())
            .or_default();
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> RetrievalResult<()> {
        let mut collections = self.collections.lock().expect("collections lock poisoned");
        let entries = collections.entry(collection.to_string()).or_default();
        for point in points {
            entries.retain(|existing| existing.id != point.id);
            entries.push(point);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        score_threshold: Option<f32>,
        payload_filter: Option<(&str, &str)>,
    ) -> RetrievalResult<Vec<SearchHit>> {
        let collections = self.collections.lock().expect("collections lock poisoned");
        let Some(points) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut scored: Vec<(f32, &VectorPoint)> = points
            .iter()
            .filter(|point| {
                payload_filter.is_none_or(|(key, value)| {
                    point.payload.get(key).and_then(Value::as_str) == Some(value)
                })
            })
            .map(|point| (cosine(vector, &point.vector), point))
            .filter(|(score, _)| score_threshold.is_none_or(|t| *score >= t))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, point)| SearchHit::from_payload(score, point.payload.clone()))
            .collect())
    }

    async fn delete_by_payload(
        &self,
        collection: &str,
        key: &str,
        value: &str,
    ) -> RetrievalResult<()> {
        let mut collections = self.collections.lock().expect("collections lock poisoned");
        if let Some(points) = collections.get_mut(collection) {
            points.retain(|point| point.payload.get(key).and_then(Value::as_str) != Some(value));
        }
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> RetrievalResult<()> {
        self.collections
            .lock()
            .expect("collections lock poisoned")
            .remove(collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn point(vector: Vec<f32>, payload: Value) -> VectorPoint {
        VectorPoint {
            id: Uuid::new_v4().to_string(),
            vector,
            payload,
        }
    }

    #[tokio::test]
    async fn search_ranks_by_cosine_similarity() {
        let index = MemoryVectorIndex::new();
        index.ensure_collection("vs_a", 2).await.unwrap();
        index
            .upsert(
                "vs_a",
                vec![
                    point(vec![1.0, 0.0], json!({ "text": "가격 문의" })),
                    point(vec![0.0, 1.0], json!({ "text": "배송 문의" })),
                ],
            )
            .await
            .unwrap();
        let hits = index
            .search("vs_a", &[1.0, 0.1], 2, None, None)
            .await
            .unwrap();
        assert_eq!(hits[0].text, "가격 문의");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn score_threshold_filters_weak_hits() {
        let index = MemoryVectorIndex::new();
        index
            .upsert("vs_a", vec![point(vec![0.0, 1.0], json!({ "text": "x" }))])
            .await
            .unwrap();
        let hits = index
            .search("vs_a", &[1.0, 0.0], 3, Some(0.7), None)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn payload_filter_restricts_matches() {
        let index = MemoryVectorIndex::new();
        index
            .upsert(
                "vs_a",
                vec![
                    point(vec![1.0, 0.0], json!({ "text": "a", "user_id": "u1" })),
                    point(vec![1.0, 0.0], json!({ "text": "b", "user_id": "u2" })),
                ],
            )
            .await
            .unwrap();
        let hits = index
            .search("vs_a", &[1.0, 0.0], 5, None, Some(("user_id", "u1")))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "a");
    }

    #[tokio::test]
    async fn delete_by_payload_removes_matching_points() {
        let index = MemoryVectorIndex::new();
        index
            .upsert(
                "vs_a",
                vec![
                    point(vec![1.0], json!({ "file_hash": "h1" })),
                    point(vec![1.0], json!({ "file_hash": "h2" })),
                ],
            )
            .await
            .unwrap();
        index.delete_by_payload("vs_a", "file_hash", "h1").await.unwrap();
        assert_eq!(index.point_count("vs_a"), 1);
    }

    #[test]
    fn collection_name_is_prefixed() {
        assert_eq!(collection_name("abc"), "vs_abc");
    }
}
