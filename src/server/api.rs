use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use crate::capability::MergeMethod;
use crate::engine::Orchestrator;
use crate::errors::{CapabilityError, QueueError, TaskError};
use crate::queue::{QueueHandle, TaskOptions, TaskStatus};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub queue: QueueHandle,
    pub orchestrator: Arc<Orchestrator>,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub description: String,
    #[serde(default)]
    pub options: Option<TaskOptions>,
}

#[derive(Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct MergeRequest {
    #[serde(default)]
    pub method: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        if e.is_not_found() {
            ApiError::NotFound(e.to_string())
        } else {
            tracing::error!(error = %e, "Queue operation failed");
            ApiError::Internal(e.to_string())
        }
    }
}

impl From<TaskError> for ApiError {
    fn from(e: TaskError) -> Self {
        match &e {
            TaskError::Capability(CapabilityError::Api { status: 404, .. }) => {
                ApiError::NotFound(e.to_string())
            }
            TaskError::Capability(CapabilityError::Api { status, .. }) if *status < 500 => {
                ApiError::BadRequest(e.to_string())
            }
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/retry", post(retry_task))
        .route("/api/stats", get(get_stats))
        .route("/api/status", get(list_run_status))
        .route("/api/status/{id}", get(get_run_status))
        .route("/api/reviews/{number}/comments", get(get_review_comments))
        .route("/api/reviews/{number}/merge", post(merge_review))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn create_task(
    State(state): State<SharedState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.description.trim().is_empty() {
        return Err(ApiError::BadRequest("description must not be empty".into()));
    }
    let task = state
        .queue
        .add_task(req.description, req.options.unwrap_or_default())
        .await?;
    tracing::info!(task_id = %task.id, "Task added via API");
    Ok((StatusCode::CREATED, Json(task)))
}

async fn list_tasks(
    State(state): State<SharedState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = match query.status.as_deref() {
        None | Some("") | Some("all") => None,
        Some(s) => Some(s.parse::<TaskStatus>().map_err(ApiError::BadRequest)?),
    };
    let tasks = state.queue.list_tasks(status).await?;
    Ok(Json(tasks))
}

async fn get_task(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state
        .queue
        .get_task(id.clone())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Task {} not found", id)))?;
    Ok(Json(task))
}

async fn retry_task(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.queue.retry_task(id).await?;
    tracing::info!(task_id = %task.id, "Task re-queued via API");
    Ok(Json(task))
}

async fn get_stats(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.queue.stats().await?))
}

async fn list_run_status(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.orchestrator.list_tasks().await)
}

async fn get_run_status(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let run = state
        .orchestrator
        .get_task_status(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No run status for {}", id)))?;
    Ok(Json(run))
}

async fn get_review_comments(
    State(state): State<SharedState>,
    Path(number): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.orchestrator.get_pr_comments(number).await?))
}

async fn merge_review(
    State(state): State<SharedState>,
    Path(number): Path<u64>,
    body: Option<Json<MergeRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let method = match body.and_then(|Json(req)| req.method) {
        Some(m) => m.parse::<MergeMethod>().map_err(ApiError::BadRequest)?,
        None => MergeMethod::default(),
    };
    let outcome = state.orchestrator.merge_pr(number, method).await?;
    Ok(Json(outcome))
}

// ── Tests ─────────────────────────────────────────────────────────────
