//! HTTP and WebSocket surface for the chat agent.
//!
//! Every `/agents/...` request passes the session gate before any work
//! happens; WebSocket upgrades are authorized while the request is still
//! plain HTTP so denials come back as a normal 401.

use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use skiff_session::{AuthorizedChatSession, CHAT_AGENT_NAMESPACE, SessionVerifier};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::relay::{ChatTurn, ModelRelay};

/// Served for any path outside the agent and health routes.
const FALLBACK_BANNER: &str = "Assistant worker is running";

/// Application close code for a socket whose session token has expired.
const SESSION_EXPIRED_CLOSE_CODE: u16 = 4401;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub verifier: Arc<SessionVerifier>,
    pub relay: Arc<ModelRelay>,
    pub started_at: Instant,
}

impl AppState {
    pub fn from_config(config: Config) -> Self {
        let verifier = SessionVerifier::from_config(&config.verifier_config());
        let relay = ModelRelay::from_config(&config);
        Self {
            config: Arc::new(config),
            verifier: Arc::new(verifier),
            relay: Arc::new(relay),
            started_at: Instant::now(),
        }
    }
}

/// Denials share one external body regardless of the internal reason.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({"error": "unauthorized"}),
            ),
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

#[derive(Debug, Serialize)]
pub struct InstanceResponse {
    pub ok: bool,
    pub namespace: &'static str,
    pub name: String,
    pub subject: String,
}

#[derive(Debug, Deserialize)]
pub struct MessagesRequest {
    #[serde(default)]
    pub messages: Vec<ChatTurn>,
}

#[derive(Debug, Deserialize)]
struct AgentQuery {
    #[serde(default)]
    token: Option<String>,
}

/// Frames the socket sends. Incoming text frames are user turns.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChatWsFrame {
    Ready { session: String, subject: String },
    Delta { content: String },
    Done,
    Error { code: &'static str, message: String },
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/agents/:namespace/:name", get(get_agent_instance))
        .route(
            "/agents/:namespace/:name/messages",
            post(post_agent_messages),
        )
        .fallback(fallback_banner)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http()),
        )
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: state.config.service_name.clone(),
        build_sha: state.config.build_sha.clone(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

async fn fallback_banner() -> &'static str {
    FALLBACK_BANNER
}

fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    query_token: Option<&str>,
    path: &str,
) -> Result<AuthorizedChatSession, ApiError> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    skiff_session::authorize_chat_request(&state.verifier, authorization, query_token, path)
        .map_err(|denied| {
            tracing::debug!(
                target: "skiff.assistant",
                reason = denied.reason_code(),
                path = %path,
                "agent request denied"
            );
            ApiError::Unauthorized
        })
}

/// Serves a chat agent instance: WebSocket upgrades enter the socket loop,
/// plain GETs get instance info.
async fn get_agent_instance(
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
    State(state): State<AppState>,
    uri: Uri,
    Query(query): Query<AgentQuery>,
) -> Result<Response, ApiError> {
    let session = authorize(&state, &headers, query.token.as_deref(), uri.path())?;

    match ws {
        Some(ws) => {
            let state = state.clone();
            Ok(ws
                .on_upgrade(move |socket| chat_socket(state, socket, session))
                .into_response())
        }
        None => Ok(Json(InstanceResponse {
            ok: true,
            namespace: CHAT_AGENT_NAMESPACE,
            name: session.session_name,
            subject: session.subject,
        })
        .into_response()),
    }
}

/// Relays a full conversation and streams the reply text as the body.
async fn post_agent_messages(
    headers: HeaderMap,
    State(state): State<AppState>,
    uri: Uri,
    Query(query): Query<AgentQuery>,
    Json(request): Json<MessagesRequest>,
) -> Result<Response, ApiError> {
    authorize(&state, &headers, query.token.as_deref(), uri.path())?;

    let reply = state
        .relay
        .reply_stream(&request.messages)
        .map(|item| match item {
            Ok(chunk) => Ok(Bytes::from(chunk)),
            Err(error) => {
                tracing::warn!(target: "skiff.assistant", error = %error, "model stream failed");
                Err(error)
            }
        });

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(reply),
    )
        .into_response())
}

async fn chat_socket(state: AppState, mut socket: WebSocket, session: AuthorizedChatSession) {
    // Expiry is pinned from the claims that passed the gate; later turns are
    // checked against it rather than re-verifying the token.
    let expires_at = i64::try_from(session.claims.exp).unwrap_or(i64::MAX);

    let ready = ChatWsFrame::Ready {
        session: session.session_name.clone(),
        subject: session.subject.clone(),
    };
    if !send_frame(&mut socket, ready).await {
        return;
    }

    let mut history: Vec<ChatTurn> = Vec::new();
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => {
                if Utc::now().timestamp() >= expires_at {
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code: SESSION_EXPIRED_CLOSE_CODE,
                            reason: "session expired".into(),
                        })))
                        .await;
                    break;
                }
                history.push(user_turn(&text));
                if !stream_reply(&state, &mut socket, &mut history).await {
                    return;
                }
            }
            Some(Ok(Message::Ping(payload))) => {
                let _ = socket.send(Message::Pong(payload)).await;
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(_)) => break,
        }
    }
}

/// Streams one assistant reply onto the socket and records it in `history`.
/// Returns false once the socket is no longer writable.
async fn stream_reply(state: &AppState, socket: &mut WebSocket, history: &mut Vec<ChatTurn>) -> bool {
    let mut reply = state.relay.reply_stream(history);
    let mut assistant_text = String::new();

    while let Some(item) = reply.next().await {
        match item {
            Ok(chunk) => {
                assistant_text.push_str(&chunk);
                if !send_frame(socket, ChatWsFrame::Delta { content: chunk }).await {
                    return false;
                }
            }
            Err(error) => {
                tracing::warn!(target: "skiff.assistant", error = %error, "model stream failed");
                return send_frame(
                    socket,
                    ChatWsFrame::Error {
                        code: "model_error",
                        message: error.to_string(),
                    },
                )
                .await;
            }
        }
    }

    if !assistant_text.is_empty() {
        history.push(ChatTurn::assistant(assistant_text));
    }
    send_frame(socket, ChatWsFrame::Done).await
}

/// Returns whether the socket is still writable.
async fn send_frame(socket: &mut WebSocket, frame: ChatWsFrame) -> bool {
    let Ok(payload) = serde_json::to_string(&frame) else {
        return true;
    };
    socket.send(Message::Text(payload)).await.is_ok()
}

fn user_turn(text: &str) -> ChatTurn {
    serde_json::from_str::<ChatTurn>(text).unwrap_or_else(|_| ChatTurn::user(text))
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use anyhow::{Result, anyhow};
    use axum::http::Request;
    use futures::SinkExt;
    use http_body_util::BodyExt as _;
    use serde_json::Value;
    use skiff_session::{day_key, encode_session_name};
    use tokio::sync::oneshot;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::http::HeaderValue;
    use tokio_tungstenite::tungstenite::{Error as WsError, http::StatusCode as WsStatusCode};
    use tower::ServiceExt as _;

    use crate::relay::NO_KEY_NOTICE;

    use super::*;

    type WsStream =
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

    const TEST_ISSUER: &str = "http://127.0.0.1:8393";
    const TEST_AUDIENCE: &str = "skiff-app";
    const TEST_KEY: &str = "test-session-key";

    fn app() -> Router {
        build_router(AppState::from_config(Config::for_tests()))
    }

    fn issue_token(subject: &str) -> String {
        issue_token_with_exp(subject, Utc::now().timestamp() + 600)
    }

    fn issue_token_with_exp(subject: &str, exp: i64) -> String {
        let claims = serde_json::json!({
            "iss": TEST_ISSUER,
            "aud": TEST_AUDIENCE,
            "sub": subject,
            "iat": Utc::now().timestamp() - 60,
            "exp": exp,
            "email": "sam@example.com",
            "name": "Sam",
        });
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(TEST_KEY.as_bytes()),
        )
        .expect("sign token")
    }

    fn chat_path(subject: &str) -> String {
        format!(
            "/agents/chat/{}",
            encode_session_name(subject, &day_key(Utc::now()))
        )
    }

    fn get_request(path: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).expect("request")
    }

    fn post_request(path: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    async fn response_text(response: Response) -> String {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        String::from_utf8(bytes.to_vec()).expect("utf8 body")
    }

    async fn spawn_http_server(app: Router) -> Result<(SocketAddr, oneshot::Sender<()>)> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });
        Ok((addr, shutdown_tx))
    }

    async fn next_ws_message(stream: &mut WsStream) -> Result<WsMessage> {
        let message = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await?
            .ok_or_else(|| anyhow!("socket closed before a frame arrived"))??;
        Ok(message)
    }

    async fn next_json_frame(stream: &mut WsStream) -> Result<Value> {
        match next_ws_message(stream).await? {
            WsMessage::Text(text) => Ok(serde_json::from_str(&text)?),
            other => Err(anyhow!("unexpected ws message: {other:?}")),
        }
    }

    #[tokio::test]
    async fn healthz_reports_service_metadata() {
        let response = app()
            .oneshot(get_request("/healthz", None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "skiff-assistant");
    }

    #[tokio::test]
    async fn unmatched_paths_serve_the_worker_banner() {
        let response = app()
            .oneshot(get_request("/definitely/not/an/agent", None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_text(response).await, FALLBACK_BANNER);
    }

    #[tokio::test]
    async fn agent_get_without_credential_is_unauthorized() {
        let response = app()
            .oneshot(get_request(&chat_path("user_nobody"), None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response_json(response).await,
            serde_json::json!({"error": "unauthorized"})
        );
    }

    #[tokio::test]
    async fn agent_get_with_foreign_session_name_is_unauthorized() {
        let token = issue_token("user_alice");
        let response = app()
            .oneshot(get_request(&chat_path("user_bob"), Some(&token)))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response_json(response).await,
            serde_json::json!({"error": "unauthorized"})
        );
    }

    #[tokio::test]
    async fn agent_get_outside_chat_namespace_is_unauthorized() {
        let token = issue_token("user_alice");
        let name = encode_session_name("user_alice", &day_key(Utc::now()));
        let response = app()
            .oneshot(get_request(&format!("/agents/email/{name}"), Some(&token)))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response_json(response).await,
            serde_json::json!({"error": "unauthorized"})
        );
    }

    #[tokio::test]
    async fn agent_get_reports_instance_info() {
        let token = issue_token("user_alice");
        let response = app()
            .oneshot(get_request(&chat_path("user_alice"), Some(&token)))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["namespace"], "chat");
        assert_eq!(body["subject"], "user_alice");
        assert_eq!(
            body["name"],
            encode_session_name("user_alice", &day_key(Utc::now())).as_str()
        );
    }

    #[tokio::test]
    async fn agent_get_accepts_the_query_token() {
        let token = issue_token("user_alice");
        let path = format!("{}?token={token}", chat_path("user_alice"));
        let response = app()
            .oneshot(get_request(&path, None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await["ok"], true);
    }

    #[tokio::test]
    async fn messages_post_requires_a_session() {
        let response = app()
            .oneshot(post_request(
                &format!("{}/messages", chat_path("user_nobody")),
                None,
                serde_json::json!({"messages": []}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response_json(response).await,
            serde_json::json!({"error": "unauthorized"})
        );
    }

    #[tokio::test]
    async fn messages_post_streams_the_no_key_notice() {
        let token = issue_token("user_alice");
        let response = app()
            .oneshot(post_request(
                &format!("{}/messages", chat_path("user_alice")),
                Some(&token),
                serde_json::json!({"messages": [{"role": "user", "content": "hi"}]}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
            Some("text/plain; charset=utf-8")
        );
        assert_eq!(response_text(response).await, NO_KEY_NOTICE);
    }

    #[tokio::test]
    async fn ws_upgrade_is_refused_without_a_session() -> Result<()> {
        let (addr, _shutdown) = spawn_http_server(app()).await?;

        let url = format!("ws://{addr}{}", chat_path("user_nobody"));
        let request = url.into_client_request()?;

        let err = connect_async(request)
            .await
            .expect_err("expected the upgrade to be refused");
        match err {
            WsError::Http(response) => {
                assert_eq!(response.status(), WsStatusCode::UNAUTHORIZED);
            }
            other => return Err(anyhow!("unexpected ws error: {other:?}")),
        }
        Ok(())
    }

    #[tokio::test]
    async fn ws_chat_round_trip_over_a_live_socket() -> Result<()> {
        let (addr, _shutdown) = spawn_http_server(app()).await?;

        let subject = "user_ws";
        let name = encode_session_name(subject, &day_key(Utc::now()));
        let url = format!("ws://{addr}/agents/chat/{name}");
        let mut request = url.into_client_request()?;
        request.headers_mut().insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {}", issue_token(subject)))?,
        );

        let (mut stream, response) = connect_async(request).await?;
        assert_eq!(response.status(), WsStatusCode::SWITCHING_PROTOCOLS);

        let ready = next_json_frame(&mut stream).await?;
        assert_eq!(ready.get("type").and_then(Value::as_str), Some("ready"));
        assert_eq!(
            ready.get("session").and_then(Value::as_str),
            Some(name.as_str())
        );
        assert_eq!(ready.get("subject").and_then(Value::as_str), Some(subject));

        stream
            .send(WsMessage::Text("hello there".to_string()))
            .await?;

        let delta = next_json_frame(&mut stream).await?;
        assert_eq!(delta.get("type").and_then(Value::as_str), Some("delta"));
        assert_eq!(
            delta.get("content").and_then(Value::as_str),
            Some(NO_KEY_NOTICE)
        );

        let done = next_json_frame(&mut stream).await?;
        assert_eq!(done.get("type").and_then(Value::as_str), Some("done"));
        Ok(())
    }

    #[tokio::test]
    async fn ws_turn_after_expiry_closes_with_4401() -> Result<()> {
        let (addr, _shutdown) = spawn_http_server(app()).await?;

        // exp sits inside the verifier leeway so the upgrade itself succeeds.
        let subject = "user_expired";
        let token = issue_token_with_exp(subject, Utc::now().timestamp() - 5);
        let name = encode_session_name(subject, &day_key(Utc::now()));
        let url = format!("ws://{addr}/agents/chat/{name}");
        let mut request = url.into_client_request()?;
        request.headers_mut().insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {token}"))?,
        );

        let (mut stream, _response) = connect_async(request).await?;
        let ready = next_json_frame(&mut stream).await?;
        assert_eq!(ready.get("type").and_then(Value::as_str), Some("ready"));

        stream.send(WsMessage::Text("late turn".to_string())).await?;

        match next_ws_message(&mut stream).await? {
            WsMessage::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), SESSION_EXPIRED_CLOSE_CODE);
                assert_eq!(frame.reason, "session expired");
            }
            other => return Err(anyhow!("expected a close frame, got: {other:?}")),
        }
        Ok(())
    }
}
