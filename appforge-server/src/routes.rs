//! HTTP route handlers for the task API.

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use appforge::core::error::AdmissionError;
use appforge::core::types::TaskRecord;
use appforge::lifecycle::{Admission, AdmissionRequest};

use crate::state::AppState;

/// Header carrying the rate-limit identity of the caller.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/{event_id}", get(get_task))
        .route("/rate-limit", get(rate_limit))
}

/// Error body shared by every failing handler.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    RateLimited(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::RateLimited(message) => (StatusCode::TOO_MANY_REQUESTS, message),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<AdmissionError> for ApiError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::Invalid(_) => ApiError::BadRequest(err.to_string()),
            AdmissionError::RateLimited { .. } => ApiError::RateLimited(err.to_string()),
            AdmissionError::Store(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<JoinError> for ApiError {
    fn from(err: JoinError) -> Self {
        ApiError::Internal(format!("blocking task failed: {err}"))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(format!("{err:#}"))
    }
}

async fn health() -> &'static str {
    "ok"
}

fn client_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
}

#[derive(Debug, Deserialize)]
struct CreateTaskBody {
    prompt: String,
    #[serde(default)]
    record_id: Option<String>,
}

/// POST /api/tasks - admit a task and start it in the background.
async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateTaskBody>,
) -> Result<(StatusCode, Json<Admission>), ApiError> {
    let request = AdmissionRequest {
        prompt: body.prompt,
        record_id: body.record_id,
        client_id: client_id(&headers).map(str::to_string),
    };
    let admission = state
        .blocking(move |controller| controller.admit(&request))
        .await?
        .inspect_err(|err| warn!(error = %err, "task admission refused"))?;
    if state.dispatch(admission.record_id.clone()).is_some() {
        info!(record = %admission.record_id, event = %admission.event_id, "task dispatched");
    } else {
        debug!(record = %admission.record_id, "reused record already running");
    }
    Ok((StatusCode::ACCEPTED, Json(admission)))
}

/// GET /api/tasks/{event_id} - the record driven by that dispatch event.
async fn get_task(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<TaskRecord>, ApiError> {
    let lookup = event_id.clone();
    state
        .blocking(move |controller| controller.find_by_event_id(&lookup))
        .await??
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no task with event id {event_id}")))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

/// GET /api/tasks?limit=N - newest records first.
async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<TaskRecord>>, ApiError> {
    let records = state
        .blocking(move |controller| controller.recent(params.limit))
        .await??;
    Ok(Json(records))
}

#[derive(Debug, Serialize)]
struct RateLimitStatus {
    client_id: String,
    remaining: u32,
    max_requests: u32,
}

/// GET /api/rate-limit - remaining admissions for the caller's window.
async fn rate_limit(State(state): State<AppState>, headers: HeaderMap) -> Json<RateLimitStatus> {
    let controller = &state.controller;
    let client_id = controller.client_id_or_default(client_id(&headers));
    Json(RateLimitStatus {
        client_id: client_id.to_string(),
        remaining: controller.remaining(client_id),
        max_requests: controller.config().rate_limit.max_requests,
    })
}
