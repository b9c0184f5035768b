//! Provider metadata resolution.
//!
//! Endpoints are resolved fresh for every attempt from one of three sources:
//!
//! - an OpenID Connect discovery document at `https://<domain><path>`
//! - RFC 8414 metadata at `https://<domain>/oauth2[/<server>]/.well-known/oauth-authorization-server`
//! - static paths joined to `https://<domain>`, without a network fetch
//!
//! # Security Considerations
//!
//! - The metadata origin is always HTTPS: `http://` is replaced and a missing
//!   scheme is added, whatever the configuration says
//! - A failed fetch yields empty metadata; callers treat a missing endpoint as
//!   fatal for the attempt and never retry

use url::Url;

use super::http::{HttpTransport, endpoint_host};
use super::oidc::ProviderMetadata;
use crate::config::MetadataSource;

const AUTHORIZATION_SERVER_DOCUMENT: &str = "/.well-known/oauth-authorization-server";

/// Forces a configured domain onto an HTTPS origin.
///
/// ```
/// use openid_login::federation::discovery::secure_origin;
///
/// assert_eq!(secure_origin("http://idp.example.com/"), "https://idp.example.com");
/// assert_eq!(secure_origin("idp.example.com"), "https://idp.example.com");
/// ```
#[must_use]
pub fn secure_origin(domain: &str) -> String {
    let domain = domain.trim();
    let host = strip_prefix_ignore_case(domain, "https://")
        .or_else(|| strip_prefix_ignore_case(domain, "http://"))
        .unwrap_or(domain);
    format!("https://{}", host.trim_end_matches('/'))
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    value
        .get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &value[prefix.len()..])
}

/// Ensures a path starts with exactly one `/`.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    format!("/{}", path.trim().trim_start_matches('/'))
}

/// Resolves [`ProviderMetadata`] for one provider.
#[derive(Debug, Clone)]
pub struct MetadataResolver {
    provider: String,
    source: MetadataSource,
}

impl MetadataResolver {
    /// Creates a resolver for a provider's metadata source.
    #[must_use]
    pub fn new(provider: impl Into<String>, source: MetadataSource) -> Self {
        Self {
            provider: provider.into(),
            source,
        }
    }

    /// URL of the metadata document, or `None` for static endpoints.
    #[must_use]
    pub fn document_url(&self) -> Option<String> {
        match &self.source {
            MetadataSource::Discovery { domain, path } => {
                Some(format!("{}{}", secure_origin(domain), normalize_path(path)))
            }
            MetadataSource::AuthorizationServer { domain, server } => {
                let server = server
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| normalize_path(s).trim_end_matches('/').to_string())
                    .unwrap_or_default();
                Some(format!(
                    "{}/oauth2{server}{AUTHORIZATION_SERVER_DOCUMENT}",
                    secure_origin(domain)
                ))
            }
            MetadataSource::StaticEndpoints { .. } => None,
        }
    }

    /// Resolves the endpoints.
    ///
    /// Never fails: a transport or parse failure is logged and yields empty
    /// metadata.
    pub async fn resolve(&self, transport: &dyn HttpTransport) -> ProviderMetadata {
        if let MetadataSource::StaticEndpoints {
            domain,
            authorization_path,
            token_path,
            userinfo_path,
            introspection_path,
            end_session_path,
            jwks_path,
            issuer,
        } = &self.source
        {
            let origin = secure_origin(domain);
            let join = |path: &str| format!("{origin}{}", normalize_path(path));
            return ProviderMetadata {
                issuer: Some(issuer.clone().unwrap_or_else(|| origin.clone())),
                authorization_endpoint: Some(join(authorization_path.as_str())),
                token_endpoint: Some(join(token_path.as_str())),
                userinfo_endpoint: userinfo_path.as_deref().map(join),
                introspection_endpoint: introspection_path.as_deref().map(join),
                end_session_endpoint: end_session_path.as_deref().map(join),
                jwks_uri: jwks_path.as_deref().map(join),
                code_challenge_methods_supported: None,
            };
        }

        let Some(raw) = self.document_url() else {
            return ProviderMetadata::default();
        };
        let url = match Url::parse(&raw) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(provider = %self.provider, error = %e, "Invalid metadata URL");
                return ProviderMetadata::default();
            }
        };

        let body = match transport.get_json(&url, None).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(
                    provider = %self.provider,
                    error = %e,
                    "Failed to fetch provider metadata"
                );
                return ProviderMetadata::default();
            }
        };

        match serde_json::from_value::<ProviderMetadata>(serde_json::Value::Object(body)) {
            Ok(metadata) => {
                tracing::debug!(
                    provider = %self.provider,
                    endpoint = %endpoint_host(&url),
                    "Resolved provider metadata"
                );
                metadata
            }
            Err(e) => {
                tracing::warn!(
                    provider = %self.provider,
                    endpoint = %endpoint_host(&url),
                    error = %e,
                    "Failed to parse provider metadata"
                );
                ProviderMetadata::default()
            }
        }
    }
}
