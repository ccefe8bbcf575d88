use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const DEFAULT_AUTH_BASE_URL: &str = "http://127.0.0.1:8393";
pub const ENV_AUTH_BASE_URL: &str = "SKIFF_AUTH_BASE_URL";

/// How long a fetched session JWT is reused before the next network fetch.
/// Intentionally shorter than the token lifetime the auth service mints.
pub const DEFAULT_TOKEN_TTL_MS: i64 = 15 * 60 * 1000;

pub const DEFAULT_TIMEOUT_MS: u64 = 1_500;
pub const DEFAULT_REQUEST_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthInputError {
    #[error("base url must not be empty")]
    EmptyBaseUrl,
    #[error("base url must use http:// or https:// and include a host")]
    InvalidBaseUrl,
    #[error("email must not be empty")]
    EmptyEmail,
}

pub fn normalize_base_url(base_url: &str) -> Result<String, AuthInputError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(AuthInputError::EmptyBaseUrl);
    }
    let rest = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"))
        .ok_or(AuthInputError::InvalidBaseUrl)?;
    if rest.trim_start_matches('/').is_empty() {
        return Err(AuthInputError::InvalidBaseUrl);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

/// Auth service base url from the environment, falling back to the local
/// development default.
pub fn resolve_auth_base_url() -> Result<String, AuthInputError> {
    let raw = env_non_empty(ENV_AUTH_BASE_URL)
        .unwrap_or_else(|| DEFAULT_AUTH_BASE_URL.to_string());
    normalize_base_url(&raw)
}

pub fn normalize_email(email: &str) -> Result<String, AuthInputError> {
    let trimmed = email.trim();
    if trimmed.is_empty() {
        return Err(AuthInputError::EmptyEmail);
    }
    Ok(trimmed.to_ascii_lowercase())
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUserView {
    pub user_id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub ok: bool,
    pub session_token: String,
    pub user: AuthUserView,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionMeta {
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionEnvelope {
    pub ok: bool,
    pub user: AuthUserView,
    pub session: SessionMeta,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionJwtResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogoutResponse {
    pub ok: bool,
}

#[derive(Debug, Error)]
pub enum AuthClientError {
    #[error("auth_client_invalid_path")]
    InvalidPath,
    #[error("auth_request_failed:{message}")]
    Request { message: String },
    #[error("auth_read_failed:{message}")]
    Read { message: String },
    #[error("auth_http_{status}:{body}")]
    Http { status: StatusCode, body: String },
    #[error("auth_json_decode_failed:{message}")]
    Decode { message: String },
}

#[derive(Debug, Clone)]
pub struct AuthClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub request_attempts: usize,
}

impl AuthClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            request_attempts: DEFAULT_REQUEST_ATTEMPTS,
        }
    }
}

/// HTTP client for the auth service. All requests retry on transport errors
/// and carry a fresh `x-request-id`.
#[derive(Debug, Clone)]
pub struct AuthClient {
    base_url: String,
    timeout: Duration,
    request_attempts: usize,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct LoginRequestBody<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

impl AuthClient {
    pub fn new(config: AuthClientConfig) -> Result<Self, AuthInputError> {
        let base_url = normalize_base_url(&config.base_url)?;
        Ok(Self {
            base_url,
            timeout: Duration::from_millis(config.timeout_ms.max(250)),
            request_attempts: config.request_attempts.max(1),
            http: reqwest::Client::new(),
        })
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    #[must_use]
    pub fn login_path() -> &'static str {
        "/v1/auth/login"
    }

    #[must_use]
    pub fn session_path() -> &'static str {
        "/api/session"
    }

    #[must_use]
    pub fn session_jwt_path() -> &'static str {
        "/api/auth/token"
    }

    #[must_use]
    pub fn logout_path() -> &'static str {
        "/v1/auth/logout"
    }

    pub async fn login(
        &self,
        email: &str,
        name: Option<&str>,
    ) -> Result<LoginResponse, AuthClientError> {
        let body = LoginRequestBody { email, name };
        self.post_json(Self::login_path(), &body, None).await
    }

    pub async fn session(
        &self,
        session_token: &str,
    ) -> Result<SessionEnvelope, AuthClientError> {
        self.get_json(Self::session_path(), Some(session_token))
            .await
    }

    pub async fn session_jwt(
        &self,
        session_token: &str,
    ) -> Result<SessionJwtResponse, AuthClientError> {
        self.get_json(Self::session_jwt_path(), Some(session_token))
            .await
    }

    pub async fn logout(&self, session_token: &str) -> Result<LogoutResponse, AuthClientError> {
        self.post_json(
            Self::logout_path(),
            &serde_json::json!({}),
            Some(session_token),
        )
        .await
    }

    async fn get_json<T>(&self, path: &str, bearer: Option<&str>) -> Result<T, AuthClientError>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let url = self.endpoint(path).ok_or(AuthClientError::InvalidPath)?;
        let mut last_error: Option<String> = None;

        for attempt in 0..self.request_attempts {
            let mut request = self
                .http
                .get(url.as_str())
                .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
                .timeout(self.timeout);
            if let Some(token) = bearer {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(response) => return decode_json_response(response).await,
                Err(error) => {
                    last_error = Some(error.to_string());
                    if attempt + 1 >= self.request_attempts {
                        break;
                    }
                }
            }
        }

        Err(AuthClientError::Request {
            message: last_error.unwrap_or_else(|| "unknown".to_string()),
        })
    }

    async fn post_json<Req, Res>(
        &self,
        path: &str,
        payload: &Req,
        bearer: Option<&str>,
    ) -> Result<Res, AuthClientError>
    where
        Req: Serialize + ?Sized,
        Res: for<'de> serde::Deserialize<'de>,
    {
        let url = self.endpoint(path).ok_or(AuthClientError::InvalidPath)?;
        let mut last_error: Option<String> = None;

        for attempt in 0..self.request_attempts {
            let mut request = self
                .http
                .post(url.as_str())
                .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
                .timeout(self.timeout)
                .json(payload);
            if let Some(token) = bearer {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(response) => return decode_json_response(response).await,
                Err(error) => {
                    last_error = Some(error.to_string());
                    if attempt + 1 >= self.request_attempts {
                        break;
                    }
                }
            }
        }

        Err(AuthClientError::Request {
            message: last_error.unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

async fn decode_json_response<T>(response: reqwest::Response) -> Result<T, AuthClientError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| AuthClientError::Read {
            message: error.to_string(),
        })?;

    if !status.is_success() {
        return Err(format_http_error(status, &bytes));
    }

    serde_json::from_slice::<T>(&bytes).map_err(|error| AuthClientError::Decode {
        message: error.to_string(),
    })
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> AuthClientError {
    let body = non_empty_string(String::from_utf8_lossy(body).to_string())
        .unwrap_or_else(|| "<empty>".to_string());
    AuthClientError::Http { status, body }
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Source of fresh session JWTs for the token cache.
#[async_trait]
pub trait TokenTransport: Send + Sync {
    type Error: std::fmt::Display + Send;

    async fn fetch_session_jwt(&self) -> Result<String, Self::Error>;
}

/// Fetches session JWTs from the auth service using a stored session token.
pub struct SessionTokenTransport {
    client: AuthClient,
    session_token: String,
}

impl SessionTokenTransport {
    #[must_use]
    pub fn new(client: AuthClient, session_token: impl Into<String>) -> Self {
        Self {
            client,
            session_token: session_token.into(),
        }
    }
}

#[async_trait]
impl TokenTransport for SessionTokenTransport {
    type Error = AuthClientError;

    async fn fetch_session_jwt(&self) -> Result<String, Self::Error> {
        let response = self.client.session_jwt(&self.session_token).await?;
        Ok(response.token)
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Session JWT cache.
///
/// A cached token is reused until its TTL passes. `force` skips the cache.
/// Any fetch failure, including an empty token in the response, clears the
/// cache and yields `None`. The lock is never held across the network fetch,
/// so concurrent refreshes race and the last write wins.
pub struct TokenCache<T> {
    transport: T,
    ttl: chrono::Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl<T: TokenTransport> TokenCache<T> {
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self::with_ttl_ms(transport, DEFAULT_TOKEN_TTL_MS)
    }

    #[must_use]
    pub fn with_ttl_ms(transport: T, ttl_ms: i64) -> Self {
        Self {
            transport,
            ttl: chrono::Duration::milliseconds(ttl_ms),
            cached: Mutex::new(None),
        }
    }

    pub async fn session_jwt(&self, force: bool) -> Option<String> {
        if !force {
            let cached = self.cached.lock().await;
            if let Some(entry) = cached.as_ref()
                && Utc::now() < entry.expires_at
            {
                return Some(entry.token.clone());
            }
        }

        match self.transport.fetch_session_jwt().await {
            Ok(token) if !token.is_empty() => {
                let entry = CachedToken {
                    token: token.clone(),
                    expires_at: Utc::now() + self.ttl,
                };
                *self.cached.lock().await = Some(entry);
                Some(token)
            }
            Ok(_) | Err(_) => {
                *self.cached.lock().await = None;
                None
            }
        }
    }

    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedTransport {
        results: Mutex<VecDeque<Result<String, String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(results: Vec<Result<String, String>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TokenTransport for ScriptedTransport {
        type Error = String;

        async fn fetch_session_jwt(&self) -> Result<String, Self::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err("script exhausted".to_string()))
        }
    }

    fn calls(cache: &TokenCache<ScriptedTransport>) -> usize {
        cache.transport.calls.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn reuses_cached_token_within_ttl() {
        let cache = TokenCache::new(ScriptedTransport::new(vec![
            Ok("jwt-one".to_string()),
            Ok("jwt-two".to_string()),
        ]));
        assert_eq!(cache.session_jwt(false).await.as_deref(), Some("jwt-one"));
        assert_eq!(cache.session_jwt(false).await.as_deref(), Some("jwt-one"));
        assert_eq!(calls(&cache), 1);
    }

    #[tokio::test]
    async fn force_bypasses_cache() {
        let cache = TokenCache::new(ScriptedTransport::new(vec![
            Ok("jwt-one".to_string()),
            Ok("jwt-two".to_string()),
        ]));
        assert_eq!(cache.session_jwt(false).await.as_deref(), Some("jwt-one"));
        assert_eq!(cache.session_jwt(true).await.as_deref(), Some("jwt-two"));
        assert_eq!(calls(&cache), 2);
    }

    #[tokio::test]
    async fn expired_entry_triggers_refetch() {
        let cache = TokenCache::with_ttl_ms(
            ScriptedTransport::new(vec![Ok("jwt-one".to_string()), Ok("jwt-two".to_string())]),
            0,
        );
        assert_eq!(cache.session_jwt(false).await.as_deref(), Some("jwt-one"));
        assert_eq!(cache.session_jwt(false).await.as_deref(), Some("jwt-two"));
        assert_eq!(calls(&cache), 2);
    }

    #[tokio::test]
    async fn fetch_failure_clears_cache_and_yields_none() {
        let cache = TokenCache::new(ScriptedTransport::new(vec![
            Ok("jwt-one".to_string()),
            Err("boom".to_string()),
            Ok("jwt-three".to_string()),
        ]));
        assert_eq!(cache.session_jwt(false).await.as_deref(), Some("jwt-one"));
        assert_eq!(cache.session_jwt(true).await, None);
        // The failure dropped the cached entry, so even a non-forced call
        // goes back to the transport.
        assert_eq!(
            cache.session_jwt(false).await.as_deref(),
            Some("jwt-three")
        );
        assert_eq!(calls(&cache), 3);
    }

    #[tokio::test]
    async fn empty_token_in_response_counts_as_failure() {
        let cache = TokenCache::new(ScriptedTransport::new(vec![Ok(String::new())]));
        assert_eq!(cache.session_jwt(false).await, None);
    }

    #[tokio::test]
    async fn invalidate_drops_cached_entry() {
        let cache = TokenCache::new(ScriptedTransport::new(vec![
            Ok("jwt-one".to_string()),
            Ok("jwt-two".to_string()),
        ]));
        assert_eq!(cache.session_jwt(false).await.as_deref(), Some("jwt-one"));
        cache.invalidate().await;
        assert_eq!(cache.session_jwt(false).await.as_deref(), Some("jwt-two"));
        assert_eq!(calls(&cache), 2);
    }

    #[test]
    fn base_url_normalization() {
        let normalized = normalize_base_url(" https://auth.example.com/ ").expect("valid url");
        assert_eq!(normalized, "https://auth.example.com");
        assert_eq!(
            normalize_base_url("auth.example.com"),
            Err(AuthInputError::InvalidBaseUrl)
        );
        assert_eq!(
            normalize_base_url("https:///"),
            Err(AuthInputError::InvalidBaseUrl)
        );
        assert_eq!(normalize_base_url("  "), Err(AuthInputError::EmptyBaseUrl));
    }

    #[test]
    fn email_normalization_lowercases_and_trims() {
        let normalized = normalize_email("  Sam@Example.COM ").expect("valid email");
        assert_eq!(normalized, "sam@example.com");
        assert_eq!(normalize_email("   "), Err(AuthInputError::EmptyEmail));
    }

    #[test]
    fn endpoint_builder_normalizes_paths() {
        let client =
            AuthClient::new(AuthClientConfig::new("http://127.0.0.1:8393/")).expect("auth client");
        assert_eq!(
            client.endpoint("/api/auth/token"),
            Some("http://127.0.0.1:8393/api/auth/token".to_string())
        );
        assert_eq!(
            client.endpoint("api/auth/token"),
            Some("http://127.0.0.1:8393/api/auth/token".to_string())
        );
        assert_eq!(client.endpoint(""), None);
    }

    #[test]
    fn http_error_mapping_preserves_shape() {
        let error = format_http_error(StatusCode::UNAUTHORIZED, b" no session ");
        assert_eq!(error.to_string(), "auth_http_401 Unauthorized:no session");

        let empty_body = format_http_error(StatusCode::SERVICE_UNAVAILABLE, b" ");
        assert_eq!(
            empty_body.to_string(),
            "auth_http_503 Service Unavailable:<empty>"
        );
    }
}
