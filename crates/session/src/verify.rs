use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Query parameter consulted when no usable `Authorization` header is present.
pub const SESSION_TOKEN_QUERY_PARAM: &str = "token";

#[derive(Clone, Debug)]
pub struct SessionVerifierConfig {
    pub signing_key: String,
    pub issuer: String,
    pub audience: String,
    pub clock_skew_leeway_seconds: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub iss: String,
    pub aud: String,
    pub sub: Value,
    #[serde(default)]
    pub iat: usize,
    pub exp: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Outcome of a successful token check. `subject` is the string form of the
/// `sub` claim and is the identity every downstream comparison uses.
#[derive(Clone, Debug)]
pub struct VerifiedSession {
    pub subject: String,
    pub claims: SessionClaims,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SessionVerifyError {
    #[error("session token is empty")]
    EmptyToken,
    #[error("session token expired")]
    TokenExpired,
    #[error("invalid session token")]
    InvalidToken,
    #[error("session token subject is missing or unusable")]
    MissingSubject,
}

impl SessionVerifyError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::EmptyToken => "empty_token",
            Self::TokenExpired => "token_expired",
            Self::InvalidToken => "invalid_token",
            Self::MissingSubject => "missing_subject",
        }
    }
}

/// Picks the bearer credential out of a request.
///
/// A well-formed `Authorization: Bearer <token>` header wins; anything else
/// falls through to the `token` query parameter. Absence of both is not an
/// error, it simply means the request carries no session.
#[must_use]
pub fn bearer_token_from_parts<'a>(
    authorization: Option<&'a str>,
    query_token: Option<&'a str>,
) -> Option<&'a str> {
    if let Some(raw) = authorization
        && let Some(token) = raw.trim().strip_prefix("Bearer ")
    {
        return Some(token.trim());
    }
    query_token
}

#[derive(Clone)]
pub struct SessionVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl SessionVerifier {
    #[must_use]
    pub fn from_config(config: &SessionVerifierConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);
        validation.leeway = config.clock_skew_leeway_seconds;
        Self {
            decoding_key: DecodingKey::from_secret(config.signing_key.as_bytes()),
            validation,
        }
    }

    /// Full check with a reason for every failure. Used where the caller wants
    /// to log why a credential was rejected.
    pub fn authenticate(&self, token: &str) -> Result<VerifiedSession, SessionVerifyError> {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(SessionVerifyError::EmptyToken);
        }
        let decoded = decode::<SessionClaims>(trimmed, &self.decoding_key, &self.validation)
            .map_err(map_decode_error)?;
        let claims = decoded.claims;
        let subject =
            subject_from_claims(&claims.sub).ok_or(SessionVerifyError::MissingSubject)?;
        Ok(VerifiedSession { subject, claims })
    }

    /// Uniform entry point: any failure whatsoever collapses to `None`.
    #[must_use]
    pub fn verify(&self, token: &str) -> Option<VerifiedSession> {
        self.authenticate(token).ok()
    }

    /// Extracts a credential from request parts and verifies it. No credential
    /// means no session, which is also `None`.
    #[must_use]
    pub fn verify_request(
        &self,
        authorization: Option<&str>,
        query_token: Option<&str>,
    ) -> Option<VerifiedSession> {
        let token = bearer_token_from_parts(authorization, query_token)?;
        self.verify(token)
    }
}

fn subject_from_claims(sub: &Value) -> Option<String> {
    match sub {
        Value::String(value) if !value.is_empty() => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

fn map_decode_error(error: jsonwebtoken::errors::Error) -> SessionVerifyError {
    match error.kind() {
        ErrorKind::ExpiredSignature => SessionVerifyError::TokenExpired,
        _ => SessionVerifyError::InvalidToken,
    }
}
