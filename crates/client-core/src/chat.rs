use chrono::Utc;
use skiff_session::{ANONYMOUS_SESSION_NAME, CHAT_AGENT_NAMESPACE, day_key, encode_session_name};

/// Default assistant host when nothing is configured.
pub const DEFAULT_AGENT_HOST: &str = "localhost:8788";
pub const ENV_AGENT_HOST: &str = "SKIFF_AGENT_HOST";

/// Close code sent by servers for policy violations.
pub const CLOSE_CODE_POLICY_VIOLATION: u16 = 1008;
/// Application close code the assistant sends when the session token expires
/// mid-connection.
pub const CLOSE_CODE_SESSION_EXPIRED: u16 = 4401;

/// Reduces a configured agent endpoint to a bare `host[:port]`.
///
/// Accepts plain hosts as well as full `http(s)://` and `ws(s)://` URLs;
/// schemes and paths are stripped. Blank input falls back to the default.
#[must_use]
pub fn agent_host(raw: Option<&str>) -> String {
    let Some(value) = raw else {
        return DEFAULT_AGENT_HOST.to_string();
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return DEFAULT_AGENT_HOST.to_string();
    }
    let without_scheme = match trimmed.split_once("://") {
        Some((_, rest)) => rest,
        None => trimmed,
    };
    let host = without_scheme.split('/').next().unwrap_or("");
    if host.is_empty() {
        DEFAULT_AGENT_HOST.to_string()
    } else {
        host.to_string()
    }
}

/// Session name for the current UTC day, or the anonymous sentinel when no
/// user is signed in.
#[must_use]
pub fn session_name_for_user(user_id: Option<&str>) -> String {
    match user_id.map(str::trim) {
        Some(id) if !id.is_empty() => encode_session_name(id, &day_key(Utc::now())),
        _ => ANONYMOUS_SESSION_NAME.to_string(),
    }
}

#[must_use]
pub fn agent_path(session_name: &str) -> String {
    format!("/agents/{CHAT_AGENT_NAMESPACE}/{session_name}")
}

/// WebSocket URL for a chat agent instance. The token rides in the query
/// string because browser WebSocket clients cannot set headers; an empty
/// token is sent as-is and rejected server-side.
#[must_use]
pub fn connect_url(host: &str, session_name: &str, token: &str) -> String {
    format!("ws://{host}/agents/{CHAT_AGENT_NAMESPACE}/{session_name}?token={token}")
}

/// Whether a close code means the client should force-refresh its session
/// JWT before reconnecting.
#[must_use]
pub fn should_refresh_token(close_code: u16) -> bool {
    close_code == CLOSE_CODE_POLICY_VIOLATION || close_code == CLOSE_CODE_SESSION_EXPIRED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_schemes_and_paths_from_host() {
        assert_eq!(agent_host(Some("http://localhost:8788/")), "localhost:8788");
        assert_eq!(
            agent_host(Some("wss://agents.example.com/agents/chat")),
            "agents.example.com"
        );
        assert_eq!(
            agent_host(Some("agents.example.com:9000")),
            "agents.example.com:9000"
        );
    }

    #[test]
    fn blank_host_falls_back_to_default() {
        assert_eq!(agent_host(None), DEFAULT_AGENT_HOST);
        assert_eq!(agent_host(Some("   ")), DEFAULT_AGENT_HOST);
        assert_eq!(agent_host(Some("https://")), DEFAULT_AGENT_HOST);
    }

    #[test]
    fn signed_in_user_gets_daily_session_name() {
        let name = session_name_for_user(Some("user_1"));
        let decoded = skiff_session::decode_session_name(&name).expect("decodes");
        assert_eq!(decoded.user_id, "user_1");
        assert_eq!(decoded.day_key, day_key(Utc::now()));
    }

    #[test]
    fn missing_or_blank_user_is_anonymous() {
        assert_eq!(session_name_for_user(None), ANONYMOUS_SESSION_NAME);
        assert_eq!(session_name_for_user(Some("  ")), ANONYMOUS_SESSION_NAME);
    }

    #[test]
    fn connect_url_carries_token_in_query() {
        let url = connect_url("localhost:8788", "user_1:2024-05-01", "jwt-abc");
        assert_eq!(
            url,
            "ws://localhost:8788/agents/chat/user_1:2024-05-01?token=jwt-abc"
        );
        let empty = connect_url("localhost:8788", "anonymous", "");
        assert_eq!(empty, "ws://localhost:8788/agents/chat/anonymous?token=");
    }

    #[test]
    fn refresh_is_limited_to_auth_close_codes() {
        assert!(should_refresh_token(CLOSE_CODE_POLICY_VIOLATION));
        assert!(should_refresh_token(CLOSE_CODE_SESSION_EXPIRED));
        assert!(!should_refresh_token(1000));
        assert!(!should_refresh_token(1011));
    }
}
