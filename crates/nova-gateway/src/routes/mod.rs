//! HTTP surface.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod dispatch;
mod events;
mod misc;
mod sales;
mod vectorstores;

/// Build the gateway router.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(misc::healthz))
        .route("/sales/session", post(sales::start_session))
        .route("/sales/chat", post(sales::post_chat))
        .route("/sales/close", post(sales::close_session))
        .route("/sales/stream/{session_id}", get(sales::stream))
        .route("/sales/persona", get(sales::personas))
        .route("/sales/persona/random", get(sales::persona_random))
        .route("/sales/scenarios", get(sales::scenarios))
        .route("/events/jobs/{job_id}", get(events::job_stream))
        .route("/vectorstores", post(vectorstores::create))
        .route("/vectorstores/{id}", get(vectorstores::get_one))
        .route("/vectorstores/{id}/index", post(vectorstores::index))
        .route("/files/upload", post(vectorstores::upload))
        .route("/rag/query", post(vectorstores::rag_query))
        .route("/rag/embed", post(vectorstores::rag_embed))
        // Typed task submission; static routes above win over the capture.
        .route("/{function}", post(dispatch::enqueue))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
