//! Cookie-keyed registry of server-side sessions.
//!
//! Each browser gets an opaque random id in the `openid_login_session`
//! cookie. The login state machine and the signed-in user live in the
//! [`MemorySession`] behind it.
//!
//! Sessions that never sign in are evicted once they are older than the
//! login attempt time-to-live, and their cookie carries the same max-age. A
//! successful login moves the session to a fresh id so the id handed out
//! before login stops working.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum_extra::extract::CookieJar;
use cookie::{Cookie, SameSite};
use dashmap::DashMap;
use openid_login::session::keys;
use openid_login::{AuthenticationResult, MemorySession, SessionStore, StorageError};
use uuid::Uuid;

/// Session cookie name.
pub const SESSION_COOKIE_NAME: &str = "openid_login_session";

/// Keys describing the signed-in user.
pub mod user_keys {
    pub const AUTHORIZED: &str = "authorized";
    pub const USER_UUID: &str = "user_uuid";
    pub const USERNAME: &str = "username";
    pub const DOMAIN_UUID: &str = "domain_uuid";
    pub const DOMAIN_NAME: &str = "domain_name";
    pub const USER_EMAIL: &str = "user_email";
}

#[derive(Debug)]
struct SessionEntry {
    session: Arc<MemorySession>,
    created: Instant,
    signed_in: bool,
}

impl SessionEntry {
    fn new(signed_in: bool) -> Self {
        Self {
            session: Arc::new(MemorySession::new()),
            created: Instant::now(),
            signed_in,
        }
    }
}

/// All live sessions, shared across handlers.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<Uuid, SessionEntry>>,
    anonymous_ttl: Duration,
}

impl SessionRegistry {
    /// Creates a registry evicting sessions that have not signed in after
    /// `anonymous_ttl`.
    pub fn new(anonymous_ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            anonymous_ttl,
        }
    }

    /// Session named by the request cookie, if it is still live.
    pub fn find(&self, jar: &CookieJar) -> Option<(Uuid, Arc<MemorySession>)> {
        let id = Uuid::parse_str(jar.get(SESSION_COOKIE_NAME)?.value()).ok()?;
        let session = self.sessions.get(&id)?.session.clone();
        Some((id, session))
    }

    /// Session for the request, creating one (and its cookie) when needed.
    ///
    /// Stale anonymous sessions are evicted first.
    pub fn find_or_create(
        &self,
        jar: CookieJar,
        secure: bool,
    ) -> (CookieJar, Uuid, Arc<MemorySession>) {
        self.evict_stale();
        if let Some((id, session)) = self.find(&jar) {
            return (jar, id, session);
        }
        let id = Uuid::new_v4();
        let entry = SessionEntry::new(false);
        let session = entry.session.clone();
        self.sessions.insert(id, entry);
        tracing::debug!(sessions = self.sessions.len(), "Created session");
        let cookie = session_cookie(id, secure, Some(self.anonymous_ttl));
        (jar.add(cookie), id, session)
    }

    /// Moves a session that just signed in to a new id.
    ///
    /// The login tokens are carried over, the old entry is dropped and the
    /// jar gets a cookie for the new id.
    pub async fn regenerate(
        &self,
        old_id: Uuid,
        jar: CookieJar,
        secure: bool,
    ) -> Result<(CookieJar, Arc<MemorySession>), StorageError> {
        let entry = SessionEntry::new(true);
        if let Some((_, old)) = self.sessions.remove(&old_id) {
            for key in keys::LOGIN {
                if let Some(value) = old.session.get(key).await? {
                    entry.session.set(key, value).await?;
                }
            }
        }
        let id = Uuid::new_v4();
        let session = entry.session.clone();
        self.sessions.insert(id, entry);
        tracing::debug!("Regenerated session id after login");
        Ok((jar.add(session_cookie(id, secure, None)), session))
    }

    /// Drops the session and expires its cookie.
    pub fn destroy(&self, id: Uuid, jar: CookieJar) -> CookieJar {
        self.sessions.remove(&id);
        jar.remove(Cookie::build(SESSION_COOKIE_NAME).path("/"))
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<MemorySession>> {
        self.sessions.get(id).map(|entry| entry.session.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn evict_stale(&self) {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, entry| entry.signed_in || entry.created.elapsed() < self.anonymous_ttl);
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted stale anonymous sessions");
        }
    }
}

fn session_cookie(id: Uuid, secure: bool, max_age: Option<Duration>) -> Cookie<'static> {
    let mut cookie = Cookie::build((SESSION_COOKIE_NAME, id.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/");
    if let Some(max_age) = max_age {
        cookie = cookie.max_age(time::Duration::try_from(max_age).unwrap_or(time::Duration::MAX));
    }
    cookie.build()
}

/// Signs the user in by copying the login result into the session.
pub async fn record_login(
    session: &dyn SessionStore,
    result: &AuthenticationResult,
) -> Result<(), StorageError> {
    session
        .set(user_keys::AUTHORIZED, result.is_authorized().to_string())
        .await?;
    let fields = [
        (user_keys::USER_UUID, result.user_uuid()),
        (user_keys::USERNAME, result.username()),
        (user_keys::DOMAIN_UUID, result.domain_uuid()),
        (user_keys::DOMAIN_NAME, result.domain_name()),
        (user_keys::USER_EMAIL, result.user_email()),
    ];
    for (key, value) in fields {
        if let Some(value) = value {
            session.set(key, value.to_string()).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use openid_login::LocalUser;

    const TTL: Duration = Duration::from_secs(600);

    #[test]
    fn test_cookie_attributes() {
        let id = Uuid::new_v4();
        let cookie = session_cookie(id, true, Some(TTL));
        assert_eq!(cookie.name(), SESSION_COOKIE_NAME);
        assert_eq!(cookie.value(), id.to_string());
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(600)));

        assert_eq!(session_cookie(id, true, None).max_age(), None);
    }

    #[test]
    fn test_find_or_create_reuses_session() {
        let registry = SessionRegistry::new(TTL);
        let (jar, first_id, first) = registry.find_or_create(CookieJar::new(), false);
        let (_, second_id, second) = registry.find_or_create(jar, false);
        assert_eq!(first_id, second_id);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_cookie_gets_new_session() {
        let registry = SessionRegistry::new(TTL);
        let jar = CookieJar::new().add(Cookie::new(SESSION_COOKIE_NAME, "not-a-uuid"));
        assert!(registry.find(&jar).is_none());

        let (jar, _, _) = registry.find_or_create(jar, false);
        let (id, _) = registry.find(&jar).unwrap();
        let jar = registry.destroy(id, jar);
        assert!(registry.is_empty());
        assert!(registry.find(&jar).is_none());
    }

    #[test]
    fn test_stale_anonymous_sessions_are_evicted() {
        let registry = SessionRegistry::new(Duration::ZERO);
        for _ in 0..500 {
            registry.find_or_create(CookieJar::new(), false);
        }
        assert_eq!(registry.len(), 1);

        let registry = SessionRegistry::new(TTL);
        for _ in 0..5 {
            registry.find_or_create(CookieJar::new(), false);
        }
        assert_eq!(registry.len(), 5);
    }

    #[tokio::test]
    async fn test_signed_in_sessions_survive_eviction() {
        let registry = SessionRegistry::new(Duration::ZERO);
        let (jar, id, _) = registry.find_or_create(CookieJar::new(), false);
        let (jar, _) = registry.regenerate(id, jar, false).await.unwrap();

        registry.find_or_create(CookieJar::new(), false);
        assert!(registry.find(&jar).is_some());
    }

    #[tokio::test]
    async fn test_regenerate_moves_login_tokens_to_new_id() {
        let registry = SessionRegistry::new(TTL);
        let (jar, old_id, old) = registry.find_or_create(CookieJar::new(), false);
        old.set(keys::SESSION_TOKEN, "I".to_string()).await.unwrap();
        old.set(keys::PLUGIN, "google".to_string()).await.unwrap();
        old.set(keys::STATE, "s".to_string()).await.unwrap();

        let (jar, fresh) = registry.regenerate(old_id, jar, false).await.unwrap();
        let (new_id, found) = registry.find(&jar).unwrap();
        assert_ne!(new_id, old_id);
        assert!(Arc::ptr_eq(&fresh, &found));
        assert!(registry.get(&old_id).is_none());
        assert_eq!(registry.len(), 1);

        assert_eq!(fresh.get(keys::SESSION_TOKEN).await.unwrap().as_deref(), Some("I"));
        assert_eq!(fresh.get(keys::PLUGIN).await.unwrap().as_deref(), Some("google"));
        assert!(fresh.get(keys::STATE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_login_copies_user_fields() {
        let session = MemorySession::new();
        let result = AuthenticationResult::authorized(
            "google",
            LocalUser {
                user_uuid: "U".to_string(),
                username: "alice".to_string(),
                domain_uuid: "D".to_string(),
                domain_name: "pbx.example.com".to_string(),
            },
            "alice@example.com".to_string(),
        );
        record_login(&session, &result).await.unwrap();

        assert_eq!(
            session.get(user_keys::AUTHORIZED).await.unwrap().as_deref(),
            Some("true")
        );
        assert_eq!(
            session.get(user_keys::USERNAME).await.unwrap().as_deref(),
            Some("alice")
        );
        assert_eq!(
            session.get(user_keys::DOMAIN_NAME).await.unwrap().as_deref(),
            Some("pbx.example.com")
        );
    }
}
