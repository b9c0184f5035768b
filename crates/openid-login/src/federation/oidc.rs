//! Provider endpoint metadata.
//!
//! The same shape is parsed from an OpenID Connect discovery document, from
//! RFC 8414 authorization server metadata, or composed from static paths.
//! Every endpoint is optional: a failed fetch yields an empty value and each
//! step of the flow requires only the endpoints it uses.
//!
//! # References
//!
//! - [OpenID Connect Discovery 1.0](https://openid.net/specs/openid-connect-discovery-1_0.html)
//! - [RFC 8414](https://tools.ietf.org/html/rfc8414)

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ProtocolError;

/// Endpoints of one provider, resolved for one attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// Authorization endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,

    /// Token endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,

    /// User-info endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,

    /// Token introspection endpoint (RFC 7662).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introspection_endpoint: Option<String>,

    /// JSON Web Key Set used to verify ID token signatures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,

    /// RP-initiated logout endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,

    /// Supported PKCE methods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,
}

impl ProviderMetadata {
    /// Returns `true` if no endpoint is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.authorization_endpoint.is_none()
            && self.token_endpoint.is_none()
            && self.userinfo_endpoint.is_none()
            && self.introspection_endpoint.is_none()
            && self.end_session_endpoint.is_none()
    }

    /// Checks if a PKCE method is advertised.
    ///
    /// Providers that do not publish the list are assumed to accept S256.
    #[must_use]
    pub fn supports_pkce_method(&self, method: &str) -> bool {
        self.code_challenge_methods_supported
            .as_ref()
            .is_none_or(|methods| methods.iter().any(|m| m == method))
    }

    /// The authorization endpoint as a URL.
    ///
    /// # Errors
    ///
    /// Fails if the endpoint is missing or not a valid URL.
    pub fn require_authorization_endpoint(&self) -> Result<Url, ProtocolError> {
        require(&self.authorization_endpoint, "authorization endpoint")
    }

    /// The token endpoint as a URL.
    ///
    /// # Errors
    ///
    /// Fails if the endpoint is missing or not a valid URL.
    pub fn require_token_endpoint(&self) -> Result<Url, ProtocolError> {
        require(&self.token_endpoint, "token endpoint")
    }

    /// The user-info endpoint as a URL.
    ///
    /// # Errors
    ///
    /// Fails if the endpoint is missing or not a valid URL.
    pub fn require_userinfo_endpoint(&self) -> Result<Url, ProtocolError> {
        require(&self.userinfo_endpoint, "userinfo endpoint")
    }

    /// The introspection endpoint as a URL.
    ///
    /// # Errors
    ///
    /// Fails if the endpoint is missing or not a valid URL.
    pub fn require_introspection_endpoint(&self) -> Result<Url, ProtocolError> {
        require(&self.introspection_endpoint, "introspection endpoint")
    }

    /// The JWKS document as a URL.
    ///
    /// # Errors
    ///
    /// Fails if the URI is missing or not a valid URL.
    pub fn require_jwks_uri(&self) -> Result<Url, ProtocolError> {
        require(&self.jwks_uri, "JWKS URI")
    }
}

fn require(endpoint: &Option<String>, name: &'static str) -> Result<Url, ProtocolError> {
    let raw = endpoint
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or(ProtocolError::MissingEndpoint(name))?;
    Url::parse(raw).map_err(|_| ProtocolError::InvalidEndpoint(name))
}
