//! Authorization code exchange.

use std::fmt;

use url::Url;

use super::http::{HttpTransport, JsonObject, endpoint_host};
use crate::config::ProviderConfig;
use crate::error::{AuthError, ProtocolError, StorageError};
use crate::oauth::PkceVerifier;
use crate::session::{SessionStore, keys};

/// Tokens returned by the token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSet {
    /// The access token.
    pub access_token: String,
    /// The ID token, when the provider issued one.
    pub id_token: Option<String>,
    /// The refresh token, when the provider issued one.
    pub refresh_token: Option<String>,
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[redacted]")
            .field("id_token", &self.id_token.as_ref().map(|_| "[redacted]"))
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[redacted]"),
            )
            .finish()
    }
}

impl TokenSet {
    /// Interprets a token endpoint response.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` if the body carries an `error` field and
    /// `MissingAccessToken` if it has no non-empty `access_token`.
    pub fn from_response(body: &JsonObject) -> Result<Self, ProtocolError> {
        if let Some(err) = provider_error(body) {
            return Err(err);
        }

        let access_token =
            non_empty_string(body, "access_token").ok_or(ProtocolError::MissingAccessToken)?;

        Ok(Self {
            access_token,
            id_token: non_empty_string(body, "id_token"),
            refresh_token: non_empty_string(body, "refresh_token"),
        })
    }

    /// Writes the tokens and end-session endpoint into the session for logout.
    ///
    /// # Errors
    ///
    /// Returns an error if the session store fails.
    pub async fn persist(
        &self,
        session: &dyn SessionStore,
        end_session_endpoint: Option<&str>,
    ) -> Result<(), StorageError> {
        session
            .set(keys::ACCESS_TOKEN, self.access_token.clone())
            .await?;
        match &self.id_token {
            Some(id_token) => session.set(keys::SESSION_TOKEN, id_token.clone()).await?,
            None => session.remove(keys::SESSION_TOKEN).await?,
        }
        match end_session_endpoint {
            Some(endpoint) => {
                session
                    .set(keys::END_SESSION, endpoint.to_string())
                    .await
            }
            None => session.remove(keys::END_SESSION).await,
        }
    }
}

/// Exchanges an authorization code at the token endpoint.
///
/// # Errors
///
/// Returns a transport error if the endpoint cannot be reached, or a protocol
/// error for an error body or a missing access token.
pub async fn exchange_code(
    transport: &dyn HttpTransport,
    token_endpoint: &Url,
    provider: &ProviderConfig,
    code: &str,
    redirect_uri: &str,
    code_verifier: Option<&PkceVerifier>,
) -> Result<TokenSet, AuthError> {
    let mut params = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", provider.client_id.as_str()),
    ];
    if let Some(secret) = &provider.client_secret {
        params.push(("client_secret", secret.as_str()));
    }
    if let Some(verifier) = code_verifier {
        params.push(("code_verifier", verifier.as_str()));
    }

    tracing::debug!(
        provider = %provider.id,
        endpoint = %endpoint_host(token_endpoint),
        "Exchanging authorization code"
    );

    let body = transport.post_form(token_endpoint, &params).await?;
    Ok(TokenSet::from_response(&body)?)
}

/// Extracts an OAuth error from a response body.
pub(crate) fn provider_error(body: &JsonObject) -> Option<ProtocolError> {
    let error = non_empty_string(body, "error")?;
    Some(ProtocolError::provider_error(
        error,
        non_empty_string(body, "error_description"),
    ))
}

fn non_empty_string(body: &JsonObject, key: &str) -> Option<String> {
    body.get(key)
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
