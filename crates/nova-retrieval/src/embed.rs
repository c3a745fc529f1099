//! Embedding client with a deterministic hash fallback.

use serde::Deserialize;
use tracing::warn;

use crate::error::{RetrievalError, RetrievalResult};

/// FNV-1a 64-bit offset basis.
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
/// FNV-1a 64-bit prime.
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Embeds text either through a remote endpoint or a local hash fallback.
///
/// The fallback accumulates one unit count per token into a dim-D bucket
/// chosen by a stable FNV-1a hash, then L2-normalizes. Stability across
/// processes matters: indexed vectors must stay queryable after restarts,
/// which rules out any runtime-seeded hash.
pub struct Embedder {
    dim: usize,
    remote_url: Option<String>,
    client: reqwest::Client,
}

impl Embedder {
    /// Create an embedder of the given dimension.
    ///
    /// When `remote_url` is set, remote embedding is attempted first and the
    /// hash fallback only covers failures.
    #[must_use]
    pub fn new(dim: usize, remote_url: Option<String>) -> Self {
        Self {
            dim,
            remote_url,
            client: reqwest::Client::new(),
        }
    }

    /// Embedding dimension.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Embed a batch of texts.
    ///
    /// # Errors
    ///
    /// Practically infallible: remote failures degrade to the hash fallback.
    /// The `Result` stays in the signature for backends that cannot degrade.
    pub async fn embed(&self, texts: &[String]) -> RetrievalResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(url) = &self.remote_url {
            match self.remote_embed(url, texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) => {
                    warn!(error = %err, "remote embedding failed, using hash fallback");
                }
            }
        }
        Ok(texts.iter().map(|t| self.hash_embed(t)).collect())
    }

    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// See [`Embedder::embed`].
    pub async fn embed_one(&self, text: &str) -> RetrievalResult<Vec<f32>> {
        let mut vectors = self.embed(std::slice::from_ref(&text.to_string())).await?;
        Ok(vectors.pop().unwrap_or_else(|| vec![0.0; self.dim]))
    }

    async fn remote_embed(&self, url: &str, texts: &[String]) -> RetrievalResult<Vec<Vec<f32>>> {
        #[derive(Deserialize)]
        struct EmbeddingsResponse {
            embeddings: Vec<Vec<f32>>,
        }

        let endpoint = format!("{}/embeddings", url.trim_end_matches('/'));
        let response = self
            .client
            .post(&endpoint)
            .json(&serde_json::json!({ "texts": texts }))
            .send()
            .await?
            .error_for_status()?;
        let body: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
        if body.embeddings.len() != texts.len() {
            return Err(RetrievalError::Embedding(format!(
                "expected {} vectors, got {}",
                texts.len(),
                body.embeddings.len()
            )));
        }
        Ok(body.embeddings)
    }

    /// Deterministic bag-of-tokens embedding.
    #[must_use]
    pub fn hash_embed(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0_f32; self.dim];
        for token in tokenize(text) {
            let idx = (fnv1a(token.as_bytes()) % self.dim as u64) as usize;
            vec[idx] += 1.0;
        }
        l2_normalize(&mut vec);
        vec
    }
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("dim", &self.dim)
            .field("has_remote", &self.remote_url.is_some())
            .finish_non_exhaustive()
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>()
        .into_iter()
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn l2_normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_embedding_is_deterministic() {
        let embedder = Embedder::new(64, None);
        let a = embedder.hash_embed("갤럭시 가격이 궁금해요");
        let b = embedder.hash_embed("갤럭시 가격이 궁금해요");
        assert_eq!(a, b);
    }

    #[test]
    fn hash_embedding_is_normalized() {
        let embedder = Embedder::new(64, None);
        let vec = embedder.hash_embed("budget price decision purchase");
        let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let embedder = Embedder::new(16, None);
        let vec = embedder.hash_embed("");
        assert!(vec.iter().all(|v| *v == 0.0));
        assert_eq!(vec.len(), 16);
    }

    #[test]
    fn different_texts_usually_differ() {
        let embedder = Embedder::new(256, None);
        assert_ne!(
            embedder.hash_embed("세탁기 추천"),
            embedder.hash_embed("TV 추천 부탁드립니다")
        );
    }

    #[tokio::test]
    async fn batch_embed_without_remote_uses_fallback() {
        let embedder = Embedder::new(32, None);
        let vectors = embedder
            .embed(&["하나".to_string(), "둘".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 32);
    }
}
