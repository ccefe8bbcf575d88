use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::Config;

/// In-memory auth state with optional JSON persistence. A starter-sized stand-in
/// for a real identity provider: login is by email only, no credential proof.
#[derive(Clone)]
pub struct AuthService {
    state: Arc<RwLock<AuthState>>,
    store: AuthStateStore,
    session_ttl: Duration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct AuthState {
    users_by_id: HashMap<String, UserRecord>,
    users_by_email: HashMap<String, String>,
    sessions: HashMap<String, SessionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserRecord {
    id: String,
    email: String,
    name: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionRecord {
    token: String,
    user_id: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Public view of a user, as returned by every auth endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub user_id: String,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: AuthUser,
    pub session_token: String,
    pub session: SessionView,
    pub new_user: bool,
}

#[derive(Debug, Clone)]
pub struct SessionBundle {
    pub user: AuthUser,
    pub session: SessionView,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error("{message}")]
    Unauthorized { message: String },
    #[error("{message}")]
    Store { message: String },
}

pub fn normalize_email(email: &str) -> Result<String, AuthError> {
    let trimmed = email.trim();
    if trimmed.is_empty() {
        return Err(AuthError::Validation {
            field: "email",
            message: "email must not be empty".to_string(),
        });
    }
    Ok(trimmed.to_ascii_lowercase())
}

#[derive(Debug, Clone)]
struct AuthStateStore {
    path: Option<PathBuf>,
}

impl AuthStateStore {
    fn from_config(config: &Config) -> Self {
        Self {
            path: config.state_path.clone(),
        }
    }

    fn load_state(&self) -> AuthState {
        let Some(path) = self.path.as_ref() else {
            return AuthState::default();
        };

        let raw = match std::fs::read_to_string(path) {
            Ok(value) => value,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return AuthState::default();
            }
            Err(error) => {
                tracing::warn!(
                    target: "skiff.auth",
                    path = %path.display(),
                    error = %error,
                    "failed to read auth state file; booting with empty state",
                );
                return AuthState::default();
            }
        };

        match serde_json::from_str::<AuthState>(&raw) {
            Ok(state) => state,
            Err(error) => {
                tracing::warn!(
                    target: "skiff.auth",
                    path = %path.display(),
                    error = %error,
                    "failed to parse auth state file; booting with empty state",
                );
                AuthState::default()
            }
        }
    }

    async fn persist_state(&self, state: &AuthState) -> Result<(), AuthError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| AuthError::Store {
                    message: format!("failed to prepare auth state directory: {error}"),
                })?;
        }

        let payload = serde_json::to_vec(state).map_err(|error| AuthError::Store {
            message: format!("failed to encode auth state payload: {error}"),
        })?;
        let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

        tokio::fs::write(&temp_path, payload)
            .await
            .map_err(|error| AuthError::Store {
                message: format!("failed to write auth state payload: {error}"),
            })?;

        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|error| AuthError::Store {
                message: format!("failed to finalize auth state payload: {error}"),
            })?;

        Ok(())
    }
}

impl AuthService {
    pub fn from_config(config: &Config) -> Self {
        let store = AuthStateStore::from_config(config);
        let loaded_state = store.load_state();

        Self {
            state: Arc::new(RwLock::new(loaded_state)),
            store,
            session_ttl: Duration::seconds(config.session_ttl_seconds as i64),
        }
    }

    async fn persist_state_snapshot(&self, snapshot: AuthState) -> Result<(), AuthError> {
        self.store.persist_state(&snapshot).await
    }

    /// Signs a user in by email, creating the account on first sight, and
    /// issues a fresh session record.
    pub async fn login(
        &self,
        email: String,
        name: Option<String>,
    ) -> Result<LoginOutcome, AuthError> {
        let normalized_email = normalize_email(&email)?;
        let name = name
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string);
        let now = Utc::now();

        let (outcome, snapshot) = {
            let mut state = self.state.write().await;

            let (user, new_user) = match state.users_by_email.get(&normalized_email).cloned() {
                Some(user_id) => {
                    let record = state
                        .users_by_id
                        .entry(user_id.clone())
                        .or_insert_with(|| UserRecord {
                            id: user_id,
                            email: normalized_email.clone(),
                            name: None,
                            created_at: now,
                        });
                    if name.is_some() {
                        record.name = name.clone();
                    }
                    (record.clone(), false)
                }
                None => {
                    let record = UserRecord {
                        id: format!("user_{}", Uuid::new_v4().simple()),
                        email: normalized_email.clone(),
                        name: name.clone(),
                        created_at: now,
                    };
                    state
                        .users_by_email
                        .insert(normalized_email.clone(), record.id.clone());
                    state.users_by_id.insert(record.id.clone(), record.clone());
                    (record, true)
                }
            };

            let session = SessionRecord {
                token: format!("sess_{}", Uuid::new_v4().simple()),
                user_id: user.id.clone(),
                issued_at: now,
                expires_at: now + self.session_ttl,
            };
            state
                .sessions
                .insert(session.token.clone(), session.clone());

            let outcome = LoginOutcome {
                user: AuthUser {
                    user_id: user.id,
                    email: user.email,
                    name: user.name,
                },
                session_token: session.token,
                session: SessionView {
                    expires_at: session.expires_at,
                },
                new_user,
            };

            (outcome, state.clone())
        };

        self.persist_state_snapshot(snapshot).await?;
        Ok(outcome)
    }

    /// Resolves a `sess_` token to its user. Expired sessions are dropped on
    /// access and reported as unauthorized.
    pub async fn session_for_token(&self, token: &str) -> Result<SessionBundle, AuthError> {
        let mut state = self.state.write().await;

        let session = match state.sessions.get(token) {
            Some(value) => value.clone(),
            None => {
                return Err(AuthError::Unauthorized {
                    message: "unknown session token".to_string(),
                });
            }
        };

        if session.expires_at <= Utc::now() {
            state.sessions.remove(token);
            let snapshot = state.clone();
            drop(state);
            let _ = self.persist_state_snapshot(snapshot).await;
            return Err(AuthError::Unauthorized {
                message: "session expired".to_string(),
            });
        }

        let user = state
            .users_by_id
            .get(&session.user_id)
            .cloned()
            .ok_or_else(|| AuthError::Unauthorized {
                message: "session user no longer exists".to_string(),
            })?;

        Ok(SessionBundle {
            user: AuthUser {
                user_id: user.id,
                email: user.email,
                name: user.name,
            },
            session: SessionView {
                expires_at: session.expires_at,
            },
        })
    }

    /// Revokes a session. Revoking an unknown token is not an error; logout
    /// must be safe to retry.
    pub async fn logout(&self, token: &str) -> Result<bool, AuthError> {
        let (revoked, snapshot) = {
            let mut state = self.state.write().await;
            let revoked = state.sessions.remove(token).is_some();
            (revoked, state.clone())
        };
        self.persist_state_snapshot(snapshot).await?;
        Ok(revoked)
    }

    #[cfg(test)]
    pub async fn session_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }
}
