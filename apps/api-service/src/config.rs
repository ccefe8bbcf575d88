use std::env;
use std::net::SocketAddr;

use skiff_session::SessionVerifierConfig;
use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_SERVICE_NAME: &str = "skiff-api";
const DEFAULT_SESSION_SIGNING_KEY: &str = "dev-session-key";
const DEFAULT_SESSION_ISSUER: &str = "http://127.0.0.1:8393";
const DEFAULT_SESSION_AUDIENCE: &str = "skiff-app";
const DEFAULT_SESSION_LEEWAY_SECONDS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid API_BIND_ADDR value '{value}': {source}")]
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
    pub db_url: Option<String>,
    pub session_signing_key: String,
    pub session_issuer: String,
    pub session_audience: String,
    pub session_leeway_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr_raw = env::var("API_BIND_ADDR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let bind_addr = bind_addr_raw
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddr {
                value: bind_addr_raw,
                source,
            })?;

        let service_name = env::var("API_SERVICE_NAME")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());

        let build_sha = env::var("API_BUILD_SHA")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "dev".to_string());

        let db_url = env::var("API_DB_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

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

        let session_leeway_seconds = env::var("SKIFF_SESSION_LEEWAY_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_SESSION_LEEWAY_SECONDS);

        Ok(Self {
            bind_addr,
            service_name,
            build_sha,
            db_url,
            session_signing_key,
            session_issuer,
            session_audience,
            session_leeway_seconds,
        })
    }

    pub fn verifier_config(&self) -> SessionVerifierConfig {
        SessionVerifierConfig {
            signing_key: self.session_signing_key.clone(),
            issuer: self.session_issuer.clone(),
            audience: self.session_audience.clone(),
            clock_skew_leeway_seconds: self.session_leeway_seconds,
        }
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            build_sha: "test".to_string(),
            db_url: None,
            session_signing_key: "test-session-key".to_string(),
            session_issuer: DEFAULT_SESSION_ISSUER.to_string(),
            session_audience: DEFAULT_SESSION_AUDIENCE.to_string(),
            session_leeway_seconds: DEFAULT_SESSION_LEEWAY_SECONDS,
        }
    }
}
