use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::Config;
use crate::store::AuthUser;

type HmacSha256 = Hmac<Sha256>;

pub const MIN_SESSION_JWT_TTL_SECONDS: u32 = 60;
pub const MAX_SESSION_JWT_TTL_SECONDS: u32 = 3_600;

/// Mints the short-lived HS256 JWTs that downstream services verify with the
/// shared signing key.
#[derive(Debug, Clone)]
pub struct SessionJwtIssuer {
    signing_key: String,
    issuer: String,
    audience: String,
    ttl_seconds: u32,
}

#[derive(Debug, Clone)]
pub struct IssuedSessionJwt {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("{message}")]
    Unavailable { message: String },
    #[error("{message}")]
    Signing { message: String },
}

impl SessionJwtIssuer {
    pub fn from_config(config: &Config) -> Self {
        Self {
            signing_key: config.session_signing_key.clone(),
            issuer: config.session_issuer.clone(),
            audience: config.session_audience.clone(),
            ttl_seconds: config.session_jwt_ttl_seconds,
        }
    }

    /// Issues a token for the user. Configuration is re-checked on every call;
    /// a blank key, issuer, or audience, or an out-of-bounds TTL, is reported
    /// as `Unavailable` and nothing is minted.
    pub fn issue(&self, user: &AuthUser) -> Result<IssuedSessionJwt, TokenError> {
        let signing_key = self.signing_key.trim();
        if signing_key.is_empty() {
            return Err(TokenError::Unavailable {
                message: "session signing key is not configured".to_string(),
            });
        }
        if self.issuer.trim().is_empty() {
            return Err(TokenError::Unavailable {
                message: "session issuer is not configured".to_string(),
            });
        }
        if self.audience.trim().is_empty() {
            return Err(TokenError::Unavailable {
                message: "session audience is not configured".to_string(),
            });
        }
        if !(MIN_SESSION_JWT_TTL_SECONDS..=MAX_SESSION_JWT_TTL_SECONDS)
            .contains(&self.ttl_seconds)
        {
            return Err(TokenError::Unavailable {
                message: format!(
                    "session jwt ttl must be between {MIN_SESSION_JWT_TTL_SECONDS} and {MAX_SESSION_JWT_TTL_SECONDS} seconds",
                ),
            });
        }

        let now = Utc::now();
        let expires_at = now + Duration::seconds(i64::from(self.ttl_seconds));
        let mut claims = serde_json::json!({
            "iss": self.issuer,
            "aud": self.audience,
            "sub": user.user_id,
            "iat": now.timestamp(),
            "exp": expires_at.timestamp(),
            "email": user.email,
        });
        if let Some(name) = user.name.as_deref()
            && let Some(object) = claims.as_object_mut()
        {
            object.insert(
                "name".to_string(),
                serde_json::Value::String(name.to_string()),
            );
        }

        let token = encode_hs256_jwt(&claims, signing_key)?;
        Ok(IssuedSessionJwt { token, expires_at })
    }
}

fn encode_hs256_jwt(claims: &serde_json::Value, signing_key: &str) -> Result<String, TokenError> {
    let header = serde_json::json!({"alg": "HS256", "typ": "JWT"});
    let header_bytes = serde_json::to_vec(&header).map_err(|error| TokenError::Signing {
        message: format!("failed to encode jwt header: {error}"),
    })?;
    let claims_bytes = serde_json::to_vec(claims).map_err(|error| TokenError::Signing {
        message: format!("failed to encode jwt claims: {error}"),
    })?;

    let header_segment = URL_SAFE_NO_PAD.encode(header_bytes);
    let claims_segment = URL_SAFE_NO_PAD.encode(claims_bytes);
    let signing_input = format!("{header_segment}.{claims_segment}");

    let mut mac =
        HmacSha256::new_from_slice(signing_key.as_bytes()).map_err(|error| TokenError::Signing {
            message: format!("failed to initialize jwt signer: {error}"),
        })?;
    mac.update(signing_input.as_bytes());
    let signature_segment = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{signing_input}.{signature_segment}"))
}
