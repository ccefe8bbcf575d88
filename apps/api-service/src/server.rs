use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use skiff_session::{SessionVerifier, VerifiedSession, bearer_token_from_parts};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::tasks::{TASK_LIST_LIMIT, Task, TaskStatus, TaskStore, TaskStoreError};

const TASK_TITLE_MAX_CHARS: usize = 255;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub verifier: Arc<SessionVerifier>,
    pub tasks: Arc<dyn TaskStore>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config, tasks: Arc<dyn TaskStore>) -> Self {
        let verifier = SessionVerifier::from_config(&config.verifier_config());
        Self {
            config: Arc::new(config),
            verifier: Arc::new(verifier),
            tasks,
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    Validation { message: String },
    Unauthorized,
    Internal { message: String },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Validation { message } => {
                (StatusCode::BAD_REQUEST, serde_json::json!({"error": message}))
            }
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({"error": "unauthorized"}),
            ),
            Self::Internal { message } => {
                tracing::error!(target: "skiff.api", error = %message, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({"error": "internal_error"}),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<TaskStoreError> for ApiError {
    fn from(error: TaskStoreError) -> Self {
        match error {
            TaskStoreError::Db(message) => Self::Internal { message },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: String,
    pub build_sha: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct SystemNowResponse {
    pub now_iso: String,
    pub unix_ms: i64,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct PatchTaskStatusRequest {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub ok: bool,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub ok: bool,
    pub task: Task,
}

#[derive(Debug, Serialize)]
pub struct TaskPatchResponse {
    pub ok: bool,
    pub task: Option<Task>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/api/rpc/health", get(rpc_health))
        .route("/api/rpc/system.now", get(system_now))
        .route("/api/rpc/auth.me", get(auth_me))
        .route("/api/rpc/tasks.list", get(tasks_list))
        .route("/api/rpc/tasks.create", post(tasks_create))
        .route("/api/rpc/tasks.patchStatus", post(tasks_patch_status))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http()),
        )
        .with_state(state)
}

/// Resolves the caller's session from the `Authorization` header. Rejections
/// share one external 401 body; the concrete reason only reaches the logs.
fn require_session(state: &AppState, headers: &HeaderMap) -> Result<VerifiedSession, ApiError> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let Some(token) = bearer_token_from_parts(authorization, None) else {
        tracing::debug!(target: "skiff.api", reason = "missing_credential", "session rejected");
        return Err(ApiError::Unauthorized);
    };
    match state.verifier.authenticate(token) {
        Ok(session) => Ok(session),
        Err(error) => {
            tracing::debug!(
                target: "skiff.api",
                reason = error.reason_code(),
                "session rejected",
            );
            Err(ApiError::Unauthorized)
        }
    }
}

fn validated_title(raw: &str) -> Result<String, ApiError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(ApiError::Validation {
            message: "title must not be empty".to_string(),
        });
    }
    if title.chars().count() > TASK_TITLE_MAX_CHARS {
        return Err(ApiError::Validation {
            message: format!("title must be at most {TASK_TITLE_MAX_CHARS} characters"),
        });
    }
    Ok(title.to_string())
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: state.config.service_name.clone(),
        build_sha: state.config.build_sha.clone(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

async fn rpc_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true}))
}

async fn system_now() -> Json<SystemNowResponse> {
    let now = Utc::now();
    Json(SystemNowResponse {
        now_iso: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        unix_ms: now.timestamp_millis(),
    })
}

async fn auth_me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, ApiError> {
    let session = require_session(&state, &headers)?;
    Ok(Json(MeResponse {
        user_id: session.subject,
        email: session.claims.email,
        name: session.claims.name,
    }))
}

async fn tasks_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TaskListResponse>, ApiError> {
    let session = require_session(&state, &headers)?;
    let tasks = state
        .tasks
        .list_for_user(&session.subject, TASK_LIST_LIMIT)
        .await?;
    Ok(Json(TaskListResponse { ok: true, tasks }))
}

async fn tasks_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateTaskRequest>,
) -> Result<Json<TaskResponse>, ApiError> {
    let session = require_session(&state, &headers)?;
    let title = validated_title(&request.title)?;
    let task = state
        .tasks
        .insert(Task::create(&session.subject, title, Utc::now()))
        .await?;
    Ok(Json(TaskResponse { ok: true, task }))
}

async fn tasks_patch_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PatchTaskStatusRequest>,
) -> Result<Json<TaskPatchResponse>, ApiError> {
    let session = require_session(&state, &headers)?;
    let status = request
        .status
        .parse::<TaskStatus>()
        .map_err(|error| ApiError::Validation {
            message: error.to_string(),
        })?;
    let task = state
        .tasks
        .patch_status(&request.id, &session.subject, status, Utc::now())
        .await?;
    Ok(Json(TaskPatchResponse { ok: true, task }))
}
