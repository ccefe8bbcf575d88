#![forbid(unsafe_code)]

pub mod gate;
pub mod name;
pub mod target;
pub mod verify;

pub use gate::{AuthorizedChatSession, CHAT_AGENT_NAMESPACE, GateDenied, authorize_chat_request};
pub use name::{
    ANONYMOUS_SESSION_NAME, DecodedSessionName, day_key, decode_session_name, encode_session_name,
};
pub use target::{AGENTS_PATH_PREFIX, AgentTarget, parse_agent_target};
pub use verify::{
    SESSION_TOKEN_QUERY_PARAM, SessionClaims, SessionVerifier, SessionVerifierConfig,
    SessionVerifyError, VerifiedSession, bearer_token_from_parts,
};
