//! RP-initiated logout.
//!
//! Uses the tokens stored by a successful login. When both the ID token and
//! the provider's end-session endpoint are known, the browser is sent to
//! `<end_session_endpoint>?id_token_hint=<token>[&post_logout_redirect_uri=<uri>]`
//! and the whole session is destroyed. Without a stored token only the
//! login-flow keys are removed and nothing is sent to the provider.
//!
//! # References
//!
//! - [OpenID Connect RP-Initiated Logout 1.0](https://openid.net/specs/openid-connect-rpinitiated-1_0.html)

use url::Url;

use crate::error::StorageError;
use crate::session::{SessionStore, keys};

/// Where the browser goes after logout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutAction {
    /// Redirect to the provider's end-session endpoint.
    Redirect(Url),
    /// Local logout only.
    Local,
}

/// Terminates the provider session state held in `session`.
///
/// # Errors
///
/// Returns an error if the session store fails.
pub async fn logout(
    session: &dyn SessionStore,
    post_logout_redirect_uri: Option<&str>,
) -> Result<LogoutAction, StorageError> {
    let Some(id_token) = session
        .get(keys::SESSION_TOKEN)
        .await?
        .filter(|t| !t.is_empty())
    else {
        for key in keys::ALL {
            session.remove(key).await?;
        }
        return Ok(LogoutAction::Local);
    };

    let end_session = session
        .get(keys::END_SESSION)
        .await?
        .and_then(|endpoint| match Url::parse(&endpoint) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(error = %e, "Stored end-session endpoint is not a valid URL");
                None
            }
        });

    session.clear().await?;

    let Some(mut url) = end_session else {
        return Ok(LogoutAction::Local);
    };
    {
        let mut params = url.query_pairs_mut();
        params.append_pair("id_token_hint", &id_token);
        if let Some(uri) = post_logout_redirect_uri {
            params.append_pair("post_logout_redirect_uri", uri);
        }
    }
    tracing::debug!("Redirecting to provider end-session endpoint");
    Ok(LogoutAction::Redirect(url))
}
