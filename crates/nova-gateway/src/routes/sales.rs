//! Sales-simulation endpoints: session lifecycle, chat turns, SSE stream.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use chrono::Utc;
use futures::Stream;
use nova_core::{Function, JobId, Persona, ResultEventKind, SessionId, Task, TaskPayload};
use nova_session::ConversationPhase;
use nova_store::ThreadDoc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// How long the dispatcher waits for the worker's greeting.
const GREETING_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub(crate) struct StartSessionRequest {
    user_id: String,
    #[serde(default)]
    persona: Option<Persona>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    scenario: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatRequest {
    session_id: String,
    seller_msg: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CloseRequest {
    session_id: String,
}

fn sim_task(
    state: &AppState,
    session_id: SessionId,
    user_id: String,
    thread_id: Option<String>,
    sub_function: &str,
    payload: TaskPayload,
) -> Task {
    Task {
        job_id: JobId::new(),
        session_id: Some(session_id),
        org_id: state.settings.org_id.clone(),
        user_id,
        thread_id,
        function: Function::Sim,
        sub_function: sub_function.to_string(),
        vectorstore_id: None,
        files: vec![],
        payload,
        created_at: Utc::now(),
        extensions: Map::new(),
    }
}

/// Start a session: enqueue `sim.start` and wait for the greeting on this
/// node's own stream hub.
pub(crate) async fn start_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartSessionRequest>,
) -> ApiResult<Json<Value>> {
    if request.user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("user_id must not be empty".to_string()));
    }
    let session_id = match &request.session_id {
        Some(id) => SessionId::parse(id).map_err(|e| ApiError::BadRequest(e.to_string()))?,
        None => SessionId::new(),
    };

    let now = Utc::now();
    let thread_id = state
        .documents
        .create_thread(&ThreadDoc {
            user_id: request.user_id.clone(),
            title: "sales".to_string(),
            function_name: "sales".to_string(),
            session_id: Some(session_id.as_str().to_string()),
            created_at: now,
            last_timestamp: now,
        })
        .await?;

    // Subscribe before publishing so the greeting cannot slip past us.
    let mut subscription = state.hub.subscribe(session_id.as_str());

    let task = sim_task(
        &state,
        session_id.clone(),
        request.user_id.clone(),
        Some(thread_id.clone()),
        "start",
        TaskPayload::SimStart {
            persona: request.persona.clone(),
            scenario: request.scenario.clone(),
        },
    );
    task.validate()?;
    state.broker.publish_task(&task).await?;
    info!(session_id = %session_id, job_id = %task.job_id, "simulation start enqueued");

    let greeting = tokio::time::timeout(GREETING_TIMEOUT, async {
        while let Some(event) = subscription.recv().await {
            match event.event {
                ResultEventKind::Greeting => {
                    return Some(
                        event
                            .data
                            .as_str()
                            .unwrap_or_default()
                            .to_string(),
                    );
                }
                ResultEventKind::Failed | ResultEventKind::Error => return None,
                _ => {}
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
    .ok_or_else(|| {
        warn!(session_id = %session_id, "greeting did not arrive in time");
        ApiError::Unavailable("greeting generation timed out".to_string())
    })?;

    Ok(Json(json!({
        "session_id": session_id.as_str(),
        "thread_id": thread_id,
        "greeting": greeting,
    })))
}

/// Publish a seller turn. Fire-and-forget: the reply arrives on the SSE
/// stream.
pub(crate) async fn post_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<Value>> {
    let session_id = SessionId::parse(&request.session_id)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if request.seller_msg.trim().is_empty() {
        return Err(ApiError::BadRequest("seller_msg must not be empty".to_string()));
    }

    let Some(session) = state.sessions.get(&session_id).await? else {
        return Err(ApiError::NotFound(format!("session {session_id}")));
    };
    if session.phase == ConversationPhase::Closed {
        return Err(ApiError::Conflict(format!("session {session_id} is closed")));
    }
    // Turns are serialized per session; the worker's CAS is authoritative,
    // this check just rejects the obvious case before it hits the broker.
    if session.phase == ConversationPhase::Generating {
        return Err(ApiError::Conflict(format!(
            "session {session_id} is still generating the previous turn"
        )));
    }

    let user_id = request
        .user_id
        .clone()
        .unwrap_or_else(|| session.user_id.clone());
    let task = sim_task(
        &state,
        session_id.clone(),
        user_id,
        request.thread_id.clone(),
        "chat",
        TaskPayload::SimChat {
            seller_msg: request.seller_msg.clone(),
        },
    );
    task.validate()?;
    state.broker.publish_chat_request(&task).await?;

    Ok(Json(json!({ "status": "message published" })))
}

/// Explicitly close a session.
pub(crate) async fn close_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CloseRequest>,
) -> ApiResult<Json<Value>> {
    let session_id = SessionId::parse(&request.session_id)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let Some(session) = state.sessions.get(&session_id).await? else {
        return Err(ApiError::NotFound(format!("session {session_id}")));
    };

    let task = sim_task(
        &state,
        session_id.clone(),
        session.user_id.clone(),
        None,
        "close",
        TaskPayload::SimClose,
    );
    state.broker.publish_task(&task).await?;
    Ok(Json(json!({ "status": "close requested" })))
}

/// SSE stream of one session's chunks. Ends after the `end` event.
pub(crate) async fn stream(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut subscription = state.hub.subscribe(&session_id);
    let stream = async_stream::stream! {
        while let Some(event) = subscription.recv().await {
            let name = event.event.as_str();
            let data = event.data.to_string();
            yield Ok(Event::default()
                .event(name)
                .id(event.seq.to_string())
                .data(data));
            if event.event == ResultEventKind::End {
                break;
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// All preset personas.
pub(crate) async fn personas(State(state): State<Arc<AppState>>) -> Json<Vec<Persona>> {
    Json(state.personas.presets().to_vec())
}

/// One random preset persona.
pub(crate) async fn persona_random(State(state): State<Arc<AppState>>) -> Json<Persona> {
    Json(state.personas.random())
}

/// The scenario catalog.
pub(crate) async fn scenarios(
    State(state): State<Arc<AppState>>,
) -> Json<nova_core::ScenarioCatalog> {
    Json(state.scenarios.clone())
}
