use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skiff_session::bearer_token_from_parts;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::store::{AuthError, AuthService, AuthUser, SessionView};
use crate::token::{SessionJwtIssuer, TokenError};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: AuthService,
    pub issuer: Arc<SessionJwtIssuer>,
    pub started_at: Instant,
}

impl AppState {
    pub fn from_config(config: Config) -> Self {
        let auth = AuthService::from_config(&config);
        let issuer = SessionJwtIssuer::from_config(&config);
        Self {
            config: Arc::new(config),
            auth,
            issuer: Arc::new(issuer),
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    Validation { message: String },
    Unauthorized,
    /// 401 shape reserved for `/api/session`, which reports `{"ok": false}`.
    SessionUnavailable,
    TokenUnavailable,
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
            Self::SessionUnavailable => (StatusCode::UNAUTHORIZED, serde_json::json!({"ok": false})),
            Self::TokenUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({"error": "token_unavailable"}),
            ),
            Self::Internal { message } => {
                tracing::error!(target: "skiff.auth", error = %message, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({"error": "internal_error"}),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: String,
    pub build_sha: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub ok: bool,
    pub session_token: String,
    pub user: AuthUser,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub ok: bool,
    pub user: AuthUser,
    pub session: SessionView,
}

#[derive(Debug, Serialize)]
pub struct SessionJwtResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub ok: bool,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/v1/auth/login", post(login))
        .route("/api/session", get(session))
        .route("/api/auth/token", get(session_jwt))
        .route("/v1/auth/logout", post(logout))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http()),
        )
        .with_state(state)
}

fn session_token_from_headers(headers: &HeaderMap) -> Option<&str> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    bearer_token_from_parts(authorization, None)
}

fn auth_api_error(error: AuthError) -> ApiError {
    match error {
        AuthError::Validation { message, .. } => ApiError::Validation { message },
        AuthError::Unauthorized { .. } => ApiError::Unauthorized,
        AuthError::Store { message } => ApiError::Internal { message },
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: state.config.service_name.clone(),
        build_sha: state.config.build_sha.clone(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let outcome = state
        .auth
        .login(request.email, request.name)
        .await
        .map_err(auth_api_error)?;
    if outcome.new_user {
        tracing::info!(
            target: "skiff.auth",
            user_id = %outcome.user.user_id,
            "created user on first login",
        );
    }
    Ok(Json(LoginResponse {
        ok: true,
        session_token: outcome.session_token,
        user: outcome.user,
    }))
}

async fn session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SessionResponse>, ApiError> {
    let token = session_token_from_headers(&headers).ok_or(ApiError::SessionUnavailable)?;
    let bundle = state
        .auth
        .session_for_token(token)
        .await
        .map_err(|error| match error {
            AuthError::Unauthorized { .. } => ApiError::SessionUnavailable,
            other => auth_api_error(other),
        })?;
    Ok(Json(SessionResponse {
        ok: true,
        user: bundle.user,
        session: bundle.session,
    }))
}

async fn session_jwt(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SessionJwtResponse>, ApiError> {
    let token = session_token_from_headers(&headers).ok_or(ApiError::Unauthorized)?;
    let bundle = state
        .auth
        .session_for_token(token)
        .await
        .map_err(auth_api_error)?;
    let issued = state.issuer.issue(&bundle.user).map_err(|error| match error {
        TokenError::Unavailable { message } => {
            tracing::warn!(target: "skiff.auth", reason = %message, "session jwt unavailable");
            ApiError::TokenUnavailable
        }
        TokenError::Signing { message } => ApiError::Internal { message },
    })?;
    Ok(Json(SessionJwtResponse {
        token: issued.token,
        expires_at: issued.expires_at,
    }))
}

async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<LogoutResponse>, ApiError> {
    if let Some(token) = session_token_from_headers(&headers) {
        state.auth.logout(token).await.map_err(auth_api_error)?;
    }
    Ok(Json(LogoutResponse { ok: true }))
}
