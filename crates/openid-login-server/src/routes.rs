//! Login endpoints.
//!
//! - `GET /open_id?action=<provider>` starts a login, or completes it when the
//!   provider redirects back with `code`/`state` (or `error`)
//! - `GET /logout` ends the session, via the provider when it supports it
//! - `GET /open_id/providers` lists the providers available for sign-in

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use axum_extra::extract::CookieJar;
use openid_login::federation::logout;
use openid_login::session::keys;
use openid_login::{
    AuthOutcome, AuthenticationResult, CallbackParams, Disposition, LogoutAction,
    ProviderRegistry, ProviderSummary, SessionStore, StorageError,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::config::LoginConfig;
use crate::session::{SessionRegistry, record_login};

/// Shared state for the login routes.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ProviderRegistry>,
    pub sessions: SessionRegistry,
    pub login: Arc<LoginConfig>,
    pub secure_cookies: bool,
}

impl AppState {
    /// `attempt_ttl` bounds how long a session may live without signing in.
    pub fn new(
        registry: ProviderRegistry,
        login: LoginConfig,
        secure_cookies: bool,
        attempt_ttl: Duration,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            sessions: SessionRegistry::new(attempt_ttl),
            login: Arc::new(login),
            secure_cookies,
        }
    }
}

pub fn login_routes(state: AppState) -> Router {
    Router::new()
        .route("/open_id", get(open_id))
        .route("/open_id/providers", get(providers))
        .route("/logout", get(logout_handler))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct ActionQuery {
    #[serde(default)]
    pub action: Option<String>,
}

/// `302 Found` to `location`.
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

fn request_host(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .filter(|h| !h.is_empty())
}

async fn open_id(
    State(state): State<AppState>,
    Query(action): Query<ActionQuery>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let Some(authenticator) = action
        .action
        .as_deref()
        .and_then(|a| state.registry.resolve(a))
    else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(host) = request_host(&headers) else {
        return (StatusCode::BAD_REQUEST, "Missing Host header").into_response();
    };

    let (mut jar, id, session) = state.sessions.find_or_create(jar, state.secure_cookies);
    let failure = &state.login.failure_destination;

    let response = match authenticator
        .authenticate(&params, host, session.as_ref())
        .await
    {
        Ok(AuthOutcome::Redirect(url)) => found(url.as_str()),
        Ok(AuthOutcome::Completed(result)) if result.is_authorized() => {
            match sign_in(&state, id, jar.clone(), &result).await {
                Ok(signed_in) => {
                    jar = signed_in;
                    found(&state.login.destination)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to record login in session");
                    found(failure)
                }
            }
        }
        Ok(AuthOutcome::Completed(_)) => found(failure),
        Err(e) => match e.disposition() {
            Disposition::Deny => found(failure),
            Disposition::Abort => (StatusCode::BAD_REQUEST, e.user_message()).into_response(),
        },
    };
    (jar, response).into_response()
}

/// Moves the session to a new id and records the signed-in user in it.
async fn sign_in(
    state: &AppState,
    id: Uuid,
    jar: CookieJar,
    result: &AuthenticationResult,
) -> Result<CookieJar, StorageError> {
    let (jar, session) = state
        .sessions
        .regenerate(id, jar, state.secure_cookies)
        .await?;
    record_login(session.as_ref(), result).await?;
    Ok(jar)
}

async fn providers(State(state): State<AppState>) -> Json<Vec<ProviderSummary>> {
    Json(state.registry.providers())
}

async fn logout_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let failure = &state.login.failure_destination;
    let Some((id, session)) = state.sessions.find(&jar) else {
        return found(failure);
    };

    let post_logout = match (session.get(keys::PLUGIN).await, request_host(&headers)) {
        (Ok(Some(plugin)), Some(host)) => state.registry.post_logout_redirect_uri(&plugin, host),
        _ => None,
    };

    let action = logout(session.as_ref(), post_logout.as_deref()).await;
    let jar = state.sessions.destroy(id, jar);
    let response = match action {
        Ok(LogoutAction::Redirect(url)) => found(url.as_str()),
        Ok(LogoutAction::Local) => found(failure),
        Err(e) => {
            tracing::warn!(error = %e, "Logout failed, session dropped locally");
            found(failure)
        }
    };
    (jar, response).into_response()
}
