//! Task submission: `POST /{assist,galaxy,coach,translate}`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use nova_core::{Function, JobId, Task, TaskPayload};
use nova_store::{title_from_prompt, ThreadDoc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Request body for task submission.
#[derive(Debug, Deserialize)]
pub(crate) struct JobRequest {
    user_id: String,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    params: Map<String, Value>,
    #[serde(default)]
    vectorstore_id: Option<String>,
    #[serde(default)]
    files: Option<Vec<String>>,
    #[serde(default)]
    sub_function: Option<String>,
}

/// Accepted-job response.
#[derive(Debug, Serialize)]
pub(crate) struct JobResponse {
    job_id: String,
    thread_id: String,
    status_url: String,
}

fn build_payload(function: Function, request: &JobRequest) -> ApiResult<TaskPayload> {
    let prompt = request.prompt.clone().unwrap_or_default();
    match function {
        Function::Translate => {
            if prompt.trim().is_empty() {
                return Err(ApiError::BadRequest("prompt is required".to_string()));
            }
            let lang = |key: &str| {
                request
                    .params
                    .get(key)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            let target = lang("target_lang");
            Ok(TaskPayload::Translate {
                text: prompt,
                source_lang: lang("source_lang"),
                target_lang: if target.is_empty() {
                    "en".to_string()
                } else {
                    target
                },
            })
        }
        _ => Ok(TaskPayload::Prompt {
            prompt,
            params: request.params.clone(),
        }),
    }
}

/// Validate, record a thread, enqueue, and return the stream URL. Never
/// waits for completion.
pub(crate) async fn enqueue(
    State(state): State<Arc<AppState>>,
    Path(function): Path<String>,
    Json(request): Json<JobRequest>,
) -> ApiResult<Json<JobResponse>> {
    let function: Function = function
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("unknown function: {function}")))?;
    if !matches!(
        function,
        Function::Assist | Function::Galaxy | Function::Coach | Function::Translate
    ) {
        return Err(ApiError::BadRequest(format!(
            "function {function} is not dispatchable here"
        )));
    }

    let sub_function = request.sub_function.clone().unwrap_or_else(|| {
        function.allowed_sub_functions()[0].to_string()
    });
    let payload = build_payload(function, &request)?;

    let now = Utc::now();
    let thread_id = state
        .documents
        .create_thread(&ThreadDoc {
            user_id: request.user_id.clone(),
            title: title_from_prompt(
                request.prompt.as_deref().unwrap_or_default(),
                function.as_str(),
            ),
            function_name: function.as_str().to_string(),
            session_id: None,
            created_at: now,
            last_timestamp: now,
        })
        .await?;

    let task = Task {
        job_id: JobId::new(),
        session_id: None,
        org_id: state.settings.org_id.clone(),
        user_id: request.user_id.clone(),
        thread_id: Some(thread_id.clone()),
        function,
        sub_function,
        vectorstore_id: request.vectorstore_id.clone(),
        files: request.files.clone().unwrap_or_default(),
        payload,
        created_at: now,
        extensions: Map::new(),
    };
    task.validate()?;

    state.broker.publish_task(&task).await?;
    info!(job_id = %task.job_id, function = %function, "task enqueued");

    Ok(Json(JobResponse {
        status_url: format!("/events/jobs/{}", task.job_id),
        job_id: task.job_id.to_string(),
        thread_id,
    }))
}
