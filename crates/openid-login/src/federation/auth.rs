//! The authorization-code login state machine.
//!
//! # Overview
//!
//! One request handler drives both halves of the flow; which half runs
//! depends on the query parameters:
//!
//! 1. **Initiate** (no `code`, no `error`) - resolve metadata, generate a
//!    fresh [`PendingAttempt`], set the authorize-in-progress flag and
//!    redirect to the provider
//! 2. **Callback** (`code` or `error` present) - check the pending attempt and
//!    `state`, exchange the code, read claims, map them to a local user and
//!    persist the tokens needed for logout
//!
//! The pending attempt is discarded after every callback, whatever the
//! outcome. A second initiation while the previous redirect is still in
//! progress is reported as a redirect loop instead of redirecting again.
//!
//! # Security Considerations
//!
//! - `state` is compared before any network call; a mismatch never reaches
//!   the token endpoint
//! - A misconfigured authenticator with error suppression never authorizes
//! - Codes, tokens and verifiers are never logged

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use time::OffsetDateTime;
use url::Url;

use super::authorize::build_authorization_url;
use super::claims::{fetch_userinfo, introspect, verify_id_token};
use super::discovery::MetadataResolver;
use super::http::HttpTransport;
use super::tokens::exchange_code;
use crate::config::{ClaimSource, OpenIdSettings, ProviderConfig};
use crate::error::{AuthResult, ConfigError, ProtocolError};
use crate::identity::{IdentityMapper, IdentityStore, claim_as_string};
use crate::result::AuthenticationResult;
use crate::session::{PendingAttempt, SessionStore, keys};

/// Query parameters of a login request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackParams {
    /// Authorization code.
    #[serde(default)]
    pub code: Option<String>,
    /// Returned CSRF state.
    #[serde(default)]
    pub state: Option<String>,
    /// OAuth error code reported by the provider.
    #[serde(default)]
    pub error: Option<String>,
    /// OAuth error description.
    #[serde(default)]
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parameters of a provider callback.
    #[must_use]
    pub fn callback(code: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            state: Some(state.into()),
            ..Self::default()
        }
    }

    /// Whether these parameters come from the provider rather than a user
    /// starting a login.
    #[must_use]
    pub fn is_callback(&self) -> bool {
        present(&self.code) || present(&self.error)
    }
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

/// What the front door should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Redirect the browser to the provider.
    Redirect(Url),
    /// The attempt finished with this result.
    Completed(AuthenticationResult),
}

enum Mode {
    Active(IdentityMapper),
    /// Misconfigured with error suppression on; every attempt is denied.
    Disabled,
}

/// Login flow for one configured provider.
pub struct OpenIdAuthenticator {
    provider: ProviderConfig,
    resolver: MetadataResolver,
    transport: Arc<dyn HttpTransport>,
    attempt_ttl: Duration,
    mode: Mode,
}

impl std::fmt::Debug for OpenIdAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenIdAuthenticator")
            .field("provider", &self.provider.id)
            .field("disabled", &self.is_disabled())
            .finish_non_exhaustive()
    }
}

impl OpenIdAuthenticator {
    /// Builds an authenticator and validates its configuration.
    ///
    /// With error suppression on, a configuration error is logged and the
    /// authenticator is built in a mode that denies every attempt.
    ///
    /// # Errors
    ///
    /// Returns the configuration error when suppression is off.
    pub async fn new(
        provider: ProviderConfig,
        settings: &OpenIdSettings,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn IdentityStore>,
    ) -> Result<Self, ConfigError> {
        let suppress = settings.suppress_errors_for(&provider);
        let mode = match Self::validate(&provider, store).await {
            Ok(mapper) => Mode::Active(mapper),
            Err(e) if suppress => {
                tracing::warn!(
                    provider = %provider.id,
                    error = %e,
                    "Invalid OpenID provider configuration, logins will be denied"
                );
                Mode::Disabled
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            resolver: MetadataResolver::new(provider.id.clone(), provider.metadata.clone()),
            provider,
            transport,
            attempt_ttl: settings.attempt_ttl,
            mode,
        })
    }

    async fn validate(
        provider: &ProviderConfig,
        store: Arc<dyn IdentityStore>,
    ) -> Result<IdentityMapper, ConfigError> {
        provider.validate()?;
        IdentityMapper::new(&provider.username_mapping, store).await
    }

    /// The provider configuration.
    #[must_use]
    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    /// Whether configuration errors were suppressed at construction.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        matches!(self.mode, Mode::Disabled)
    }

    /// Runs one step of the login flow.
    ///
    /// `host` is the request host, substituted into the redirect URI.
    ///
    /// # Errors
    ///
    /// Returns an error for every failed step except a missing or ambiguous
    /// local user, which completes with a denied result.
    pub async fn authenticate(
        &self,
        params: &CallbackParams,
        host: &str,
        session: &dyn SessionStore,
    ) -> AuthResult<AuthOutcome> {
        let Mode::Active(mapper) = &self.mode else {
            tracing::warn!(provider = %self.provider.id, "Login attempt on a disabled provider");
            if params.is_callback() {
                PendingAttempt::discard(session).await?;
            }
            return Ok(AuthOutcome::Completed(AuthenticationResult::denied()));
        };

        if !params.is_callback() {
            return self
                .initiate(host, session)
                .await
                .inspect_err(|e| {
                    tracing::warn!(
                        provider = %self.provider.id,
                        category = %e.category(),
                        error = %e,
                        "Failed to start OpenID login"
                    );
                })
                .map(AuthOutcome::Redirect);
        }

        let result = self.complete(mapper, params, host, session).await;
        PendingAttempt::discard(session).await?;

        match result {
            Ok(result) => Ok(AuthOutcome::Completed(result)),
            Err(e) if e.is_identity_error() => {
                tracing::info!(
                    provider = %self.provider.id,
                    reason = %e,
                    "No local user for external identity"
                );
                Ok(AuthOutcome::Completed(AuthenticationResult::denied()))
            }
            Err(e) => {
                tracing::warn!(
                    provider = %self.provider.id,
                    category = %e.category(),
                    error = %e,
                    "OpenID login failed"
                );
                Err(e)
            }
        }
    }

    async fn initiate(&self, host: &str, session: &dyn SessionStore) -> AuthResult<Url> {
        if let Some(previous) = PendingAttempt::load(session).await? {
            let now = OffsetDateTime::now_utc();
            if previous.authorize_in_progress && !previous.is_expired(self.attempt_ttl, now) {
                PendingAttempt::discard(session).await?;
                return Err(ProtocolError::RedirectLoop.into());
            }
        }

        let metadata = self.resolver.resolve(self.transport.as_ref()).await;
        let endpoint = metadata.require_authorization_endpoint()?;
        if self.provider.use_pkce && !metadata.supports_pkce_method("S256") {
            tracing::debug!(
                provider = %self.provider.id,
                "Provider does not advertise S256, sending a PKCE challenge anyway"
            );
        }

        let mut attempt = PendingAttempt::generate(
            self.provider.use_pkce,
            self.provider.claims == ClaimSource::IdToken,
        );
        attempt.mark_in_progress();
        attempt.save(session).await?;

        let redirect_uri = self.provider.redirect_uri_for(host);
        tracing::debug!(provider = %self.provider.id, "Redirecting to authorization endpoint");
        Ok(build_authorization_url(
            endpoint,
            &self.provider,
            &redirect_uri,
            &attempt,
        ))
    }

    async fn complete(
        &self,
        mapper: &IdentityMapper,
        params: &CallbackParams,
        host: &str,
        session: &dyn SessionStore,
    ) -> AuthResult<AuthenticationResult> {
        let attempt = PendingAttempt::load(session)
            .await?
            .ok_or(ProtocolError::NoPendingAttempt)?;

        let returned_state = params
            .state
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(ProtocolError::MissingState)?;
        if !attempt.state.matches(returned_state) {
            return Err(ProtocolError::StateMismatch.into());
        }

        if let Some(error) = params.error.as_deref().filter(|e| !e.is_empty()) {
            return Err(
                ProtocolError::provider_error(error, params.error_description.clone()).into(),
            );
        }

        if attempt.is_expired(self.attempt_ttl, OffsetDateTime::now_utc()) {
            return Err(ProtocolError::AttemptExpired.into());
        }

        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                ProtocolError::provider_error("invalid_request", Some("missing code".to_string()))
            })?;

        let metadata = self.resolver.resolve(self.transport.as_ref()).await;
        let token_endpoint = metadata.require_token_endpoint()?;
        let redirect_uri = self.provider.redirect_uri_for(host);

        let tokens = exchange_code(
            self.transport.as_ref(),
            &token_endpoint,
            &self.provider,
            code,
            &redirect_uri,
            attempt.code_verifier.as_ref(),
        )
        .await?;

        let claims = match self.provider.claims {
            ClaimSource::UserInfo => {
                let endpoint = metadata.require_userinfo_endpoint()?;
                fetch_userinfo(self.transport.as_ref(), &endpoint, &tokens.access_token).await?
            }
            ClaimSource::Introspection => {
                let endpoint = metadata.require_introspection_endpoint()?;
                introspect(
                    self.transport.as_ref(),
                    &endpoint,
                    &self.provider,
                    &tokens.access_token,
                )
                .await?
            }
            ClaimSource::IdToken => {
                let id_token = tokens
                    .id_token
                    .as_deref()
                    .ok_or(ProtocolError::MissingIdToken)?;
                let nonce = attempt.nonce.as_deref().ok_or_else(|| {
                    ProtocolError::InvalidPendingAttempt("missing nonce".to_string())
                })?;
                verify_id_token(
                    self.transport.as_ref(),
                    &metadata,
                    &self.provider,
                    id_token,
                    nonce,
                )
                .await?
            }
        };

        let identity = mapper.external_identity(&claims)?;
        let email = claim_as_string(&claims, &self.provider.email_claim)
            .ok_or_else(|| ProtocolError::MissingClaim(self.provider.email_claim.clone()))?;
        let user = mapper.resolve(&identity).await?;

        tokens
            .persist(session, metadata.end_session_endpoint.as_deref())
            .await?;
        session.set(keys::PLUGIN, self.provider.id.clone()).await?;

        tracing::info!(
            provider = %self.provider.id,
            user_uuid = %user.user_uuid,
            "OpenID login succeeded"
        );
        Ok(AuthenticationResult::authorized(
            self.provider.id.clone(),
            user,
            email,
        ))
    }
}
