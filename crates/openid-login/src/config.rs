//! OpenID login configuration.
//!
//! Provider settings are read once, when the authenticators are built, and are
//! immutable afterwards.
//!
//! # Example (TOML)
//!
//! ```toml
//! [open_id]
//! enabled = true
//! request_timeout = "15s"
//!
//! [[open_id.providers]]
//! id = "google"
//! display_name = "Google"
//! client_id = "1234.apps.googleusercontent.com"
//! client_secret = "secret"
//! redirect_uri = "https://{domain_name}/app/open_id/open_id.php?action={plugin}"
//! username_mapping = "email=user_email"
//! use_pkce = false
//! extra_auth_params = { prompt = "consent", access_type = "offline" }
//!
//! [open_id.providers.metadata]
//! kind = "discovery"
//! domain = "accounts.google.com"
//! ```

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Placeholder replaced by the request host in redirect URI templates.
pub const DOMAIN_NAME_PLACEHOLDER: &str = "{domain_name}";

/// Placeholder replaced by the provider identifier in redirect URI templates.
pub const PLUGIN_PLACEHOLDER: &str = "{plugin}";

/// Root OpenID login settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OpenIdSettings {
    /// Feature flag. When off, no provider is ever dispatched to.
    pub enabled: bool,

    /// Degrade misconfigured providers to a permanently failing authenticator
    /// instead of refusing to start.
    pub suppress_errors: bool,

    /// Timeout for every outbound call to a provider.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Maximum age of a pending login attempt when its callback arrives.
    #[serde(with = "humantime_serde")]
    pub attempt_ttl: Duration,

    /// Configured providers.
    pub providers: Vec<ProviderConfig>,
}

impl Default for OpenIdSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            suppress_errors: true,
            request_timeout: Duration::from_secs(30),
            attempt_ttl: Duration::from_secs(600),
            providers: Vec::new(),
        }
    }
}

impl OpenIdSettings {
    /// Validates settings that do not depend on the identity store.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero timeout or duplicate provider identifiers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout.is_zero() {
            return Err(ConfigError::missing("request_timeout"));
        }
        if self.attempt_ttl.is_zero() {
            return Err(ConfigError::missing("attempt_ttl"));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.id.as_str()) {
                return Err(ConfigError::DuplicateProvider(provider.id.clone()));
            }
        }
        Ok(())
    }

    /// Whether errors for the given provider are suppressed.
    #[must_use]
    pub fn suppress_errors_for(&self, provider: &ProviderConfig) -> bool {
        provider.suppress_errors.unwrap_or(self.suppress_errors)
    }
}

/// Configuration for one OpenID Connect provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Identifier used in the `action` parameter (e.g. "google", "okta").
    pub id: String,

    /// Human-readable name for sign-in buttons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// OAuth client ID registered with the provider.
    pub client_id: String,

    /// OAuth client secret (None for public clients).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Redirect URI template; may contain `{domain_name}` and `{plugin}`.
    pub redirect_uri: String,

    /// Space separated scopes.
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Claim to local column mapping, `external_claim=local_column`.
    pub username_mapping: String,

    /// Claim holding the user's email address.
    #[serde(default = "default_email_claim")]
    pub email_claim: String,

    /// Where the provider endpoints come from.
    pub metadata: MetadataSource,

    /// Where the user's claims come from.
    #[serde(default)]
    pub claims: ClaimSource,

    /// Send a PKCE challenge with the authorization request.
    #[serde(default = "default_true")]
    pub use_pkce: bool,

    /// Additional parameters appended to the authorization URL.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_auth_params: BTreeMap<String, String>,

    /// Where the provider sends the browser after its own logout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_logout_redirect_uri: Option<String>,

    /// Per-provider override of [`OpenIdSettings::suppress_errors`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppress_errors: Option<bool>,
}

fn default_scope() -> String {
    "openid email profile".to_string()
}

fn default_email_claim() -> String {
    "email".to_string()
}

fn default_true() -> bool {
    true
}

impl ProviderConfig {
    /// Creates a provider configuration with required fields.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
        username_mapping: impl Into<String>,
        metadata: MetadataSource,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: redirect_uri.into(),
            scope: default_scope(),
            username_mapping: username_mapping.into(),
            email_claim: default_email_claim(),
            metadata,
            claims: ClaimSource::default(),
            use_pkce: true,
            extra_auth_params: BTreeMap::new(),
            post_logout_redirect_uri: None,
            suppress_errors: None,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Sets the client secret.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Sets the scope string.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Sets the claim holding the user's email.
    #[must_use]
    pub fn with_email_claim(mut self, claim: impl Into<String>) -> Self {
        self.email_claim = claim.into();
        self
    }

    /// Sets the claim source.
    #[must_use]
    pub fn with_claims(mut self, claims: ClaimSource) -> Self {
        self.claims = claims;
        self
    }

    /// Enables or disables PKCE.
    #[must_use]
    pub fn with_pkce(mut self, use_pkce: bool) -> Self {
        self.use_pkce = use_pkce;
        self
    }

    /// Adds an extra authorization parameter.
    #[must_use]
    pub fn with_auth_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_auth_params.insert(key.into(), value.into());
        self
    }

    /// Sets the post-logout redirect URI.
    #[must_use]
    pub fn with_post_logout_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.post_logout_redirect_uri = Some(uri.into());
        self
    }

    /// Overrides error suppression for this provider.
    #[must_use]
    pub fn with_suppress_errors(mut self, suppress: bool) -> Self {
        self.suppress_errors = Some(suppress);
        self
    }

    /// Name shown to users, falling back to the identifier.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }

    /// Expands the redirect URI template for a request host.
    #[must_use]
    pub fn redirect_uri_for(&self, host: &str) -> String {
        self.redirect_uri
            .replace(DOMAIN_NAME_PLACEHOLDER, host)
            .replace(PLUGIN_PLACEHOLDER, &self.id)
    }

    /// Expands the post-logout redirect URI template for a request host.
    #[must_use]
    pub fn post_logout_redirect_uri_for(&self, host: &str) -> Option<String> {
        self.post_logout_redirect_uri.as_ref().map(|uri| {
            uri.replace(DOMAIN_NAME_PLACEHOLDER, host)
                .replace(PLUGIN_PLACEHOLDER, &self.id)
        })
    }

    /// Checks that required settings are present.
    ///
    /// The username mapping is validated separately against the identity store.
    ///
    /// # Errors
    ///
    /// Returns `MissingSetting` for the first empty required field and
    /// `InvalidUrl` when a redirect template does not yield an absolute URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::missing("id"));
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::missing("client_id"));
        }
        if self.redirect_uri.trim().is_empty() {
            return Err(ConfigError::missing("redirect_uri"));
        }
        if self.username_mapping.trim().is_empty() {
            return Err(ConfigError::missing("username_mapping"));
        }
        if self.metadata.domain().trim().is_empty() {
            return Err(ConfigError::missing("metadata.domain"));
        }
        if self.claims == ClaimSource::Introspection
            && !self.metadata.may_provide_introspection()
        {
            return Err(ConfigError::missing("metadata.introspection_path"));
        }
        check_url("redirect_uri", &self.redirect_uri_for(VALIDATION_HOST))?;
        if let Some(uri) = self.post_logout_redirect_uri_for(VALIDATION_HOST) {
            check_url("post_logout_redirect_uri", &uri)?;
        }
        Ok(())
    }
}

/// Stand-in host used to expand redirect templates during validation.
const VALIDATION_HOST: &str = "localhost";

fn check_url(setting: &str, uri: &str) -> Result<(), ConfigError> {
    url::Url::parse(uri)
        .map(|_| ())
        .map_err(|e| ConfigError::invalid_url(setting, e.to_string()))
}

/// Where provider endpoint metadata comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetadataSource {
    /// OpenID Connect discovery document at `https://<domain><path>`.
    Discovery {
        /// Provider host, scheme optional.
        domain: String,
        /// Path of the discovery document.
        #[serde(default = "default_discovery_path")]
        path: String,
    },

    /// RFC 8414 authorization server metadata at
    /// `https://<domain>/oauth2[/<server>]/.well-known/oauth-authorization-server`.
    AuthorizationServer {
        /// Provider host, scheme optional.
        domain: String,
        /// Custom authorization server identifier.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server: Option<String>,
    },

    /// Endpoints composed from the domain without any network fetch.
    StaticEndpoints {
        /// Provider host, scheme optional.
        domain: String,
        /// Authorization endpoint path.
        #[serde(default = "default_authorization_path")]
        authorization_path: String,
        /// Token endpoint path.
        #[serde(default = "default_token_path")]
        token_path: String,
        /// User-info endpoint path.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        userinfo_path: Option<String>,
        /// Introspection endpoint path.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        introspection_path: Option<String>,
        /// End-session endpoint path.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_session_path: Option<String>,
        /// JWKS document path, needed to verify asymmetrically signed ID tokens.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        jwks_path: Option<String>,
        /// Expected `iss` of ID tokens. Defaults to `https://<domain>`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        issuer: Option<String>,
    },
}

fn default_discovery_path() -> String {
    "/.well-known/openid-configuration".to_string()
}

fn default_authorization_path() -> String {
    "/authorize".to_string()
}

fn default_token_path() -> String {
    "/token".to_string()
}

impl MetadataSource {
    /// Discovery document source with the standard path.
    #[must_use]
    pub fn discovery(domain: impl Into<String>) -> Self {
        Self::Discovery {
            domain: domain.into(),
            path: default_discovery_path(),
        }
    }

    /// Provider host as configured.
    #[must_use]
    pub fn domain(&self) -> &str {
        match self {
            Self::Discovery { domain, .. }
            | Self::AuthorizationServer { domain, .. }
            | Self::StaticEndpoints { domain, .. } => domain,
        }
    }

    fn may_provide_introspection(&self) -> bool {
        match self {
            Self::StaticEndpoints {
                introspection_path, ..
            } => introspection_path.is_some(),
            _ => true,
        }
    }
}

/// Where the user's claims are read from after the token exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimSource {
    /// Bearer GET to the user-info endpoint.
    #[default]
    UserInfo,
    /// Form POST to the introspection endpoint.
    Introspection,
    /// Payload of the ID token from the token response.
    IdToken,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> ProviderConfig {
        ProviderConfig::new(
            "okta",
            "client",
            "https://{domain_name}/app/open_id/open_id.php?action={plugin}",
            "email=user_email",
            MetadataSource::discovery("idp.example.com"),
        )
    }

    #[test]
    fn test_default_settings() {
        let settings = OpenIdSettings::default();
        assert!(!settings.enabled);
        assert!(settings.suppress_errors);
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_redirect_uri_placeholders() {
        let p = provider();
        assert_eq!(
            p.redirect_uri_for("pbx.example.com"),
            "https://pbx.example.com/app/open_id/open_id.php?action=okta"
        );
    }

    #[test]
    fn test_missing_client_id_fails_validation() {
        let mut p = provider();
        p.client_id = "  ".to_string();
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("client_id"));
    }

    #[test]
    fn test_relative_redirect_uri_fails_validation() {
        let mut p = provider();
        p.redirect_uri = "/open_id?action={plugin}".to_string();
        assert!(matches!(
            p.validate(),
            Err(ConfigError::InvalidUrl { ref setting, .. }) if setting == "redirect_uri"
        ));

        let p = provider().with_post_logout_redirect_uri("{domain_name}/login.php");
        assert!(matches!(
            p.validate(),
            Err(ConfigError::InvalidUrl { ref setting, .. }) if setting == "post_logout_redirect_uri"
        ));
    }

    #[test]
    fn test_introspection_requires_endpoint_for_static_metadata() {
        let p = ProviderConfig::new(
            "static",
            "client",
            "https://example.com/cb",
            "sub=username",
            MetadataSource::StaticEndpoints {
                domain: "idp.example.com".to_string(),
                authorization_path: "/authorize".to_string(),
                token_path: "/token".to_string(),
                userinfo_path: None,
                introspection_path: None,
                end_session_path: None,
                jwks_path: None,
                issuer: None,
            },
        )
        .with_claims(ClaimSource::Introspection);
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_duplicate_provider_fails_validation() {
        let settings = OpenIdSettings {
            providers: vec![provider(), provider()],
            ..OpenIdSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::DuplicateProvider(id)) if id == "okta"
        ));
    }

    #[test]
    fn test_suppress_errors_override() {
        let settings = OpenIdSettings::default();
        assert!(settings.suppress_errors_for(&provider()));
        assert!(!settings.suppress_errors_for(&provider().with_suppress_errors(false)));
    }

    #[test]
    fn test_deserialize_provider() {
        let json = serde_json::json!({
            "enabled": true,
            "request_timeout": "5s",
            "providers": [{
                "id": "okta",
                "client_id": "abc",
                "redirect_uri": "https://{domain_name}/cb",
                "username_mapping": "username=username",
                "email_claim": "username",
                "claims": "introspection",
                "metadata": { "kind": "authorization_server", "domain": "dev-1.okta.com", "server": "default" }
            }]
        });
        let settings: OpenIdSettings = serde_json::from_value(json).unwrap();
        assert!(settings.enabled);
        assert_eq!(settings.request_timeout, Duration::from_secs(5));
        assert_eq!(settings.attempt_ttl, Duration::from_secs(600));

        let p = &settings.providers[0];
        assert_eq!(p.scope, "openid email profile");
        assert_eq!(p.claims, ClaimSource::Introspection);
        assert!(p.use_pkce);
        assert_eq!(
            p.metadata,
            MetadataSource::AuthorizationServer {
                domain: "dev-1.okta.com".to_string(),
                server: Some("default".to_string()),
            }
        );
        assert_eq!(p.display_name(), "okta");
    }
}
