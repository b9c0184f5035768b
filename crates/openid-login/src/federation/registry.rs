//! Configured providers, looked up by the `action` request parameter.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use super::auth::OpenIdAuthenticator;
use super::http::HttpTransport;
use crate::config::OpenIdSettings;
use crate::error::ConfigError;
use crate::identity::IdentityStore;

/// Strips everything but `[A-Za-z0-9_-]` from an `action` parameter.
#[must_use]
pub fn sanitize_action(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Public description of a provider, for sign-in buttons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderSummary {
    /// Value of the `action` parameter.
    pub id: String,
    /// Human-readable name.
    pub display_name: String,
}

/// One authenticator per configured provider, built at startup.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    enabled: bool,
    authenticators: BTreeMap<String, Arc<OpenIdAuthenticator>>,
}

impl ProviderRegistry {
    /// Builds and validates every configured provider.
    ///
    /// Nothing is built when the feature flag is off.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error, unless errors are suppressed.
    pub async fn from_settings(
        settings: &OpenIdSettings,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn IdentityStore>,
    ) -> Result<Self, ConfigError> {
        if !settings.enabled {
            tracing::info!("OpenID login is disabled");
            return Ok(Self::default());
        }

        if let Err(e) = settings.validate() {
            if !settings.suppress_errors {
                return Err(e);
            }
            tracing::warn!(error = %e, "Invalid OpenID settings");
        }

        let mut authenticators = BTreeMap::new();
        for provider in &settings.providers {
            if authenticators.contains_key(&provider.id) {
                tracing::warn!(provider = %provider.id, "Ignoring duplicate OpenID provider");
                continue;
            }
            let authenticator = OpenIdAuthenticator::new(
                provider.clone(),
                settings,
                transport.clone(),
                store.clone(),
            )
            .await?;
            authenticators.insert(provider.id.clone(), Arc::new(authenticator));
        }

        tracing::info!(providers = authenticators.len(), "OpenID providers loaded");
        Ok(Self {
            enabled: true,
            authenticators,
        })
    }

    /// Whether the feature flag is on.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Looks up the authenticator for an `action` parameter.
    ///
    /// Returns `None` when the feature is off or the provider is unknown.
    #[must_use]
    pub fn resolve(&self, action: &str) -> Option<Arc<OpenIdAuthenticator>> {
        if !self.enabled {
            return None;
        }
        self.authenticators.get(&sanitize_action(action)).cloned()
    }

    /// Providers that can currently be used to sign in.
    #[must_use]
    pub fn providers(&self) -> Vec<ProviderSummary> {
        if !self.enabled {
            return Vec::new();
        }
        self.authenticators
            .values()
            .filter(|a| !a.is_disabled())
            .map(|a| ProviderSummary {
                id: a.provider().id.clone(),
                display_name: a.provider().display_name().to_string(),
            })
            .collect()
    }

    /// Post-logout redirect target of the provider that completed the login.
    #[must_use]
    pub fn post_logout_redirect_uri(&self, plugin: &str, host: &str) -> Option<String> {
        self.authenticators
            .get(plugin)?
            .provider()
            .post_logout_redirect_uri_for(host)
    }
}
