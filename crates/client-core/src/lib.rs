#![forbid(unsafe_code)]

pub mod auth;
pub mod chat;

pub use auth::{
    AuthClient, AuthClientConfig, AuthClientError, AuthInputError, AuthUserView,
    DEFAULT_AUTH_BASE_URL, DEFAULT_TOKEN_TTL_MS, ENV_AUTH_BASE_URL, LoginResponse, LogoutResponse,
    SessionEnvelope, SessionJwtResponse, SessionTokenTransport, TokenCache, TokenTransport,
    normalize_base_url, normalize_email, resolve_auth_base_url,
};
pub use chat::{
    CLOSE_CODE_POLICY_VIOLATION, CLOSE_CODE_SESSION_EXPIRED, DEFAULT_AGENT_HOST, ENV_AGENT_HOST,
    agent_host, agent_path, connect_url, session_name_for_user, should_refresh_token,
};
