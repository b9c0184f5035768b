//! Session-state port.
//!
//! The login flow spans several HTTP requests. Everything it needs to carry
//! between them lives in a per-browser session behind [`SessionStore`], so the
//! state machine can be driven without a live HTTP session.
//!
//! # Security Considerations
//!
//! - Never log session values (state, verifier, tokens)
//! - A pending attempt must be discarded on every terminal callback outcome

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::{AuthError, ProtocolError, StorageError};
use crate::oauth::{PkceVerifier, StateToken, generate_nonce};

/// Session keys written by the login flow.
pub mod keys {
    /// CSRF state of the pending attempt.
    pub const STATE: &str = "open_id_state";
    /// PKCE code verifier of the pending attempt.
    pub const CODE_VERIFIER: &str = "open_id_code_verifier";
    /// OIDC nonce of the pending attempt.
    pub const NONCE: &str = "open_id_nonce";
    /// Authorize-in-progress flag.
    pub const AUTHORIZE: &str = "open_id_authorize";
    /// Creation time of the pending attempt (unix seconds).
    pub const CREATED_AT: &str = "open_id_created_at";
    /// Access token of the completed login.
    pub const ACCESS_TOKEN: &str = "open_id_access_token";
    /// ID token of the completed login, used as the logout hint.
    pub const SESSION_TOKEN: &str = "open_id_session_token";
    /// Provider end-session endpoint.
    pub const END_SESSION: &str = "open_id_end_session";
    /// Identifier of the provider that completed the login.
    pub const PLUGIN: &str = "open_id_plugin";

    /// Keys that make up a pending attempt.
    pub const ATTEMPT: [&str; 5] = [STATE, CODE_VERIFIER, NONCE, AUTHORIZE, CREATED_AT];

    /// Keys a completed login leaves behind for logout.
    pub const LOGIN: [&str; 4] = [ACCESS_TOKEN, SESSION_TOKEN, END_SESSION, PLUGIN];

    /// Every key owned by the login flow.
    pub const ALL: [&str; 9] = [
        STATE,
        CODE_VERIFIER,
        NONCE,
        AUTHORIZE,
        CREATED_AT,
        ACCESS_TOKEN,
        SESSION_TOKEN,
        END_SESSION,
        PLUGIN,
    ];
}

/// Per-browser session storage.
///
/// One session is driven serially by one browser; implementations only need
/// last-writer-wins semantics for concurrent requests.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Reads a value.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Writes a value, replacing any previous one.
    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

    /// Removes a value. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Destroys the whole session.
    async fn clear(&self) -> Result<(), StorageError>;
}

/// In-memory session.
#[derive(Debug, Default)]
pub struct MemorySession {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySession {
    /// Creates an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if no value is stored.
    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }

    /// Returns the stored keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl SessionStore for MemorySession {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.values.write().await.clear();
        Ok(())
    }
}

/// Transient state of one login attempt.
#[derive(Debug, Clone)]
pub struct PendingAttempt {
    /// CSRF state round-tripped through the provider.
    pub state: StateToken,
    /// PKCE verifier, when the provider uses PKCE.
    pub code_verifier: Option<PkceVerifier>,
    /// Nonce expected in the ID token, when claims come from it.
    pub nonce: Option<String>,
    /// Set once the authorization redirect has been emitted.
    pub authorize_in_progress: bool,
    /// When the attempt was created.
    pub created_at: OffsetDateTime,
}

impl PendingAttempt {
    /// Generates fresh random values for a new attempt.
    #[must_use]
    pub fn generate(use_pkce: bool, use_nonce: bool) -> Self {
        Self {
            state: StateToken::generate(),
            code_verifier: use_pkce.then(PkceVerifier::generate),
            nonce: use_nonce.then(generate_nonce),
            authorize_in_progress: false,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Marks the authorization redirect as emitted.
    pub fn mark_in_progress(&mut self) {
        self.authorize_in_progress = true;
    }

    /// Whether the attempt is older than `ttl` at `now`.
    #[must_use]
    pub fn is_expired(&self, ttl: Duration, now: OffsetDateTime) -> bool {
        now - self.created_at > ttl
    }

    /// Writes the attempt into the session, replacing any previous attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the session store fails.
    pub async fn save(&self, session: &dyn SessionStore) -> Result<(), StorageError> {
        session
            .set(keys::STATE, self.state.as_str().to_string())
            .await?;
        match &self.code_verifier {
            Some(verifier) => {
                session
                    .set(keys::CODE_VERIFIER, verifier.as_str().to_string())
                    .await?
            }
            None => session.remove(keys::CODE_VERIFIER).await?,
        }
        match &self.nonce {
            Some(nonce) => session.set(keys::NONCE, nonce.clone()).await?,
            None => session.remove(keys::NONCE).await?,
        }
        if self.authorize_in_progress {
            session.set(keys::AUTHORIZE, "true".to_string()).await?;
        } else {
            session.remove(keys::AUTHORIZE).await?;
        }
        session
            .set(
                keys::CREATED_AT,
                self.created_at.unix_timestamp().to_string(),
            )
            .await
    }

    /// Reads the pending attempt from the session.
    ///
    /// Returns `None` when no attempt is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the session store fails or the stored values are
    /// unreadable.
    pub async fn load(session: &dyn SessionStore) -> Result<Option<Self>, AuthError> {
        let Some(state) = session.get(keys::STATE).await? else {
            return Ok(None);
        };

        let code_verifier = session
            .get(keys::CODE_VERIFIER)
            .await?
            .map(PkceVerifier::new)
            .transpose()
            .map_err(ProtocolError::from)?;

        let created_at = session
            .get(keys::CREATED_AT)
            .await?
            .ok_or_else(|| ProtocolError::InvalidPendingAttempt("missing creation time".into()))?;
        let created_at = created_at
            .parse::<i64>()
            .ok()
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
            .ok_or_else(|| ProtocolError::InvalidPendingAttempt("bad creation time".into()))?;

        Ok(Some(Self {
            state: StateToken::from_stored(state),
            code_verifier,
            nonce: session.get(keys::NONCE).await?,
            authorize_in_progress: Self::authorize_in_progress(session).await?,
            created_at,
        }))
    }

    /// Reads the authorize-in-progress flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the session store fails.
    pub async fn authorize_in_progress(session: &dyn SessionStore) -> Result<bool, StorageError> {
        Ok(session.get(keys::AUTHORIZE).await?.as_deref() == Some("true"))
    }

    /// Removes every key of the pending attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the session store fails.
    pub async fn discard(session: &dyn SessionStore) -> Result<(), StorageError> {
        for key in keys::ATTEMPT {
            session.remove(key).await?;
        }
        Ok(())
    }
}
