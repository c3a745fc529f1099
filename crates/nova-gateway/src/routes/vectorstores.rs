//! Vector store and file management, delegated to the retrieval adapter.

use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::Json;
use chrono::Utc;
use nova_llm::degraded_reply;
use nova_retrieval::{chunk_text, collection_name, parse_text_from_bytes, VectorPoint};
use nova_store::FileMeta;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// `POST /vectorstores`: create an empty store and its collection.
pub(crate) async fn create(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let id = state.documents.create_vectorstore().await?;
    state
        .retrieval
        .index()
        .ensure_collection(&collection_name(&id), state.settings.vector_dim)
        .await?;
    Ok(Json(json!({ "id": id })))
}

/// `GET /vectorstores/{id}`: existence check.
pub(crate) async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.documents.vectorstore_exists(&id).await? {
        return Err(ApiError::NotFound(format!("vectorstore {id}")));
    }
    Ok(Json(json!({ "id": id })))
}

/// `POST /vectorstores/{id}/index`: (re)index every registered file.
pub(crate) async fn index(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let files = state.documents.list_files(&id).await?;
    let collection = collection_name(&id);
    state
        .retrieval
        .index()
        .ensure_collection(&collection, state.settings.vector_dim)
        .await?;

    let mut indexed_points = 0_usize;
    for meta in &files {
        let bytes = state.objects.get(&meta.object_name).await?;
        let text = parse_text_from_bytes(&bytes, &meta.filename);
        let chunks = chunk_text(&text, 600, 120);
        if chunks.is_empty() {
            continue;
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = state.retrieval.embedder().embed(&texts).await?;
        let points = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorPoint {
                id: Uuid::new_v4().to_string(),
                vector,
                payload: json!({
                    "text": chunk.text,
                    "filename": meta.filename,
                    "file_id": meta.object_name,
                    "file_hash": meta.file_hash,
                    "chunk_start": chunk.start,
                    "chunk_end": chunk.end,
                }),
            })
            .collect::<Vec<_>>();
        indexed_points += points.len();
        state.retrieval.index().upsert(&collection, points).await?;
    }
    info!(vectorstore_id = %id, files = files.len(), indexed_points, "vectorstore indexed");
    Ok(Json(json!({ "files": files.len(), "indexed_points": indexed_points })))
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadParams {
    user_id: String,
    #[serde(default)]
    vectorstore_id: Option<String>,
}

/// `POST /files/upload`: store the file, de-duplicate its hash globally,
/// register it under the target store.
///
/// A hash uploaded to store V removes the same hash (registry entry and
/// vector points) from every other store, so each file lives in exactly one
/// place.
pub(crate) async fn upload(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UploadParams>,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    if params.user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("user_id must not be empty".to_string()));
    }

    let mut content: Option<(String, String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("upload.bin").to_string();
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            content = Some((filename, content_type, bytes.to_vec()));
        }
    }
    let Some((filename, content_type, bytes)) = content else {
        return Err(ApiError::BadRequest("file field required".to_string()));
    };
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("empty file".to_string()));
    }

    let safe = std::path::Path::new(&filename)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload.bin")
        .to_string();
    let object_name = format!(
        "uploads/{}/{}_{safe}",
        state.settings.org_id,
        Utc::now().timestamp_millis()
    );
    state.objects.put(&object_name, &bytes).await?;

    let file_hash = format!("{:x}", Sha256::digest(&bytes));
    let meta = FileMeta {
        user_id: params.user_id.clone(),
        filename: safe,
        file_hash: file_hash.clone(),
        file_size: bytes.len() as u64,
        uploaded_at: Utc::now(),
        object_name,
        content_type,
    };

    let target_id = match &params.vectorstore_id {
        Some(id) => {
            if !state.documents.vectorstore_exists(id).await? {
                return Err(ApiError::NotFound(format!("vectorstore {id}")));
            }
            id.clone()
        }
        None => {
            let id = state.documents.create_vectorstore().await?;
            state
                .retrieval
                .index()
                .ensure_collection(&collection_name(&id), state.settings.vector_dim)
                .await?;
            id
        }
    };

    // Global de-duplication: the hash leaves every other store.
    for other in state
        .documents
        .vectorstores_with_hash(&file_hash, &target_id)
        .await?
    {
        state.documents.remove_file_hash(&other, &file_hash).await?;
        if let Err(err) = state
            .retrieval
            .index()
            .delete_by_payload(&collection_name(&other), "file_hash", &file_hash)
            .await
        {
            // Losing stale points is recoverable; the upload proceeds.
            warn!(vectorstore_id = %other, error = %err, "stale point cleanup failed");
        }
    }

    state.documents.register_file(&target_id, &meta).await?;
    info!(vectorstore_id = %target_id, file_hash = %meta.file_hash, "file registered");

    Ok(Json(json!({ "vectorstore_id": target_id, "meta": meta })))
}

#[derive(Debug, Deserialize)]
pub(crate) struct RagQueryRequest {
    prompt: String,
    vectorstore_id: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
}

fn default_top_k() -> usize {
    3
}

/// `POST /rag/query`: one-shot retrieve-then-generate.
pub(crate) async fn rag_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RagQueryRequest>,
) -> ApiResult<Json<Value>> {
    let result = state
        .retrieval
        .answer_with_rag(
            state.llm.as_ref(),
            &request.prompt,
            &request.vectorstore_id,
            request.top_k,
        )
        .await?;
    let answer = match result {
        Ok(answer) => json!({ "answer": answer.answer, "evidence": answer.evidence }),
        Err(err) => json!({ "answer": degraded_reply(&err), "evidence": [] }),
    };
    Ok(Json(answer))
}

#[derive(Debug, Deserialize)]
pub(crate) struct RagEmbedRequest {
    texts: Vec<String>,
}

/// `POST /rag/embed`: embed a batch of documents.
pub(crate) async fn rag_embed(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RagEmbedRequest>,
) -> ApiResult<Json<Value>> {
    let embeddings = state.retrieval.embedder().embed(&request.texts).await?;
    Ok(Json(json!({ "embeddings": embeddings })))
}
