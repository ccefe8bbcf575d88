use crate::name::decode_session_name;
use crate::target::parse_agent_target;
use crate::verify::{SessionClaims, SessionVerifier, bearer_token_from_parts};

/// Namespace the gate admits. Requests addressing any other agent namespace
/// are denied even with a valid session.
pub const CHAT_AGENT_NAMESPACE: &str = "chat";

/// Everything a handler needs after the gate has passed a request.
#[derive(Clone, Debug)]
pub struct AuthorizedChatSession {
    pub subject: String,
    pub session_name: String,
    pub day_key: String,
    pub claims: SessionClaims,
}

/// Internal denial reasons. Externally every one of these becomes the same
/// generic 401 so probes cannot tell which check failed.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum GateDenied {
    #[error("no valid session credential")]
    Unauthenticated { reason: &'static str },
    #[error("request does not address a chat agent instance")]
    WrongTarget,
    #[error("session name does not decode to a user id")]
    MalformedName,
    #[error("session name user does not match the verified subject")]
    SubjectMismatch,
}

impl GateDenied {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Unauthenticated { reason } => reason,
            Self::WrongTarget => "wrong_target",
            Self::MalformedName => "malformed_name",
            Self::SubjectMismatch => "subject_mismatch",
        }
    }
}

/// Decides whether a request may reach a chat agent instance.
///
/// Checks run in order: session first, then the addressed target, then the
/// session-name ownership comparison. The function is pure; it never mutates
/// state and the same inputs always produce the same answer.
pub fn authorize_chat_request(
    verifier: &SessionVerifier,
    authorization: Option<&str>,
    query_token: Option<&str>,
    path: &str,
) -> Result<AuthorizedChatSession, GateDenied> {
    let token = bearer_token_from_parts(authorization, query_token).ok_or(
        GateDenied::Unauthenticated {
            reason: "missing_credential",
        },
    )?;
    let session = verifier
        .authenticate(token)
        .map_err(|error| GateDenied::Unauthenticated {
            reason: error.reason_code(),
        })?;

    let target = parse_agent_target(path);
    let (Some(namespace), Some(name)) = (target.namespace, target.name) else {
        return Err(GateDenied::WrongTarget);
    };
    if namespace != CHAT_AGENT_NAMESPACE {
        return Err(GateDenied::WrongTarget);
    }

    let decoded = decode_session_name(&name).ok_or(GateDenied::MalformedName)?;
    if decoded.user_id != session.subject {
        return Err(GateDenied::SubjectMismatch);
    }

    Ok(AuthorizedChatSession {
        subject: session.subject,
        session_name: name,
        day_key: decoded.day_key,
        claims: session.claims,
    })
}
