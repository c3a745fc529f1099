//! Nova Retrieval - the retrieve-then-generate seam.
//!
//! A uniform contract over the external vector index, an embedding client
//! with a deterministic hash fallback, and the RAG answer pipeline. The
//! fallback embedding is not semantically meaningful, but it keeps the whole
//! pipeline functional in tests and in the absence of vendor credentials.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod embed;
pub mod error;
pub mod index;
pub mod rag;
pub mod text;

pub use embed::Embedder;
pub use error::{RetrievalError, RetrievalResult};
pub use index::{
    collection_name, HttpVectorIndex, MemoryVectorIndex, SearchHit, VectorIndex, VectorPoint,
};
pub use rag::{RagAnswer, RetrievalAdapter, NO_RELEVANT_ANSWER};
pub use text::{chunk_text, parse_text_from_bytes, TextChunk};
