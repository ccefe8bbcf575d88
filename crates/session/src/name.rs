use chrono::{DateTime, Utc};

/// Sentinel session name used when no user is signed in. Never decodes.
pub const ANONYMOUS_SESSION_NAME: &str = "anonymous";

const DAY_KEY_LEN: usize = 10;

/// Halves recovered from a per-user-per-day session name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedSessionName {
    pub user_id: String,
    pub day_key: String,
}

/// Calendar day of `now` in UTC, formatted `YYYY-MM-DD`.
#[must_use]
pub fn day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

#[must_use]
pub fn encode_session_name(user_id: &str, day_key: &str) -> String {
    format!("{user_id}:{day_key}")
}

/// Splits a session name back into its user id and day key.
///
/// The day key is matched by digit shape only (`\d{4}-\d{2}-\d{2}` at the end
/// of the name, after a colon). Calendar validity is deliberately not checked:
/// a name like `user_1:2024-13-45` decodes. The user id may itself contain
/// colons; the date is always the part after the last one. The recovered user
/// id is trimmed and must be non-empty.
#[must_use]
pub fn decode_session_name(name: &str) -> Option<DecodedSessionName> {
    let trimmed = name.trim();
    let (user_part, date_part) = trimmed.rsplit_once(':')?;
    if !is_day_key_shaped(date_part) {
        return None;
    }
    let user_id = user_part.trim();
    if user_id.is_empty() {
        return None;
    }
    Some(DecodedSessionName {
        user_id: user_id.to_string(),
        day_key: date_part.to_string(),
    })
}

fn is_day_key_shaped(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.len() != DAY_KEY_LEN {
        return false;
    }
    bytes.iter().enumerate().all(|(index, byte)| match index {
        4 | 7 => *byte == b'-',
        _ => byte.is_ascii_digit(),
    })
}
