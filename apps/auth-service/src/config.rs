use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8393";
const DEFAULT_SERVICE_NAME: &str = "skiff-auth";
const DEFAULT_SESSION_TTL_SECONDS: u64 = 2_592_000;
const DEFAULT_SESSION_SIGNING_KEY: &str = "dev-session-key";
const DEFAULT_SESSION_ISSUER: &str = "http://127.0.0.1:8393";
const DEFAULT_SESSION_AUDIENCE: &str = "skiff-app";
const DEFAULT_SESSION_JWT_TTL_SECONDS: u32 = 900;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid AUTH_BIND_ADDR value '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub service_name: String,
    pub build_sha: String,
    pub state_path: Option<PathBuf>,
    pub session_ttl_seconds: u64,
    pub session_signing_key: String,
    pub session_issuer: String,
    pub session_audience: String,
    pub session_jwt_ttl_seconds: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr_raw = env::var("AUTH_BIND_ADDR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let bind_addr = bind_addr_raw
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddr {
                value: bind_addr_raw,
                source,
            })?;

        let service_name = env::var("AUTH_SERVICE_NAME")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());

        let build_sha = env::var("AUTH_BUILD_SHA")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "dev".to_string());

        let state_path = env::var("AUTH_STATE_PATH")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        let session_ttl_seconds = env::var("AUTH_SESSION_TTL_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_SESSION_TTL_SECONDS)
            .max(1);

        let session_signing_key = env::var("SKIFF_SESSION_SIGNING_KEY")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SESSION_SIGNING_KEY.to_string());

        let session_issuer = env::var("SKIFF_SESSION_ISSUER")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SESSION_ISSUER.to_string());

        let session_audience = env::var("SKIFF_SESSION_AUDIENCE")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SESSION_AUDIENCE.to_string());

        let session_jwt_ttl_seconds = env::var("AUTH_SESSION_JWT_TTL_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(DEFAULT_SESSION_JWT_TTL_SECONDS);

        Ok(Self {
            bind_addr,
            service_name,
            build_sha,
            state_path,
            session_ttl_seconds,
            session_signing_key,
            session_issuer,
            session_audience,
            session_jwt_ttl_seconds,
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            build_sha: "test".to_string(),
            state_path: None,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            session_signing_key: "test-session-key".to_string(),
            session_issuer: DEFAULT_SESSION_ISSUER.to_string(),
            session_audience: DEFAULT_SESSION_AUDIENCE.to_string(),
            session_jwt_ttl_seconds: DEFAULT_SESSION_JWT_TTL_SECONDS,
        }
    }
}
