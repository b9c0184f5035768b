//! OpenID Connect federation with an external identity provider.
//!
//! - [`discovery`] - Provider metadata resolution
//! - [`authorize`] - Authorization request URL
//! - [`tokens`] - Authorization code exchange
//! - [`claims`] - User info, introspection and ID token claims
//! - [`jwks`] - Provider signing keys for ID token verification
//! - [`auth`] - The login state machine
//! - [`logout`] - RP-initiated logout
//! - [`registry`] - Providers by `action` identifier
//! - [`http`] - Outbound HTTP transport

pub mod auth;
pub mod authorize;
pub mod claims;
pub mod discovery;
pub mod http;
pub mod jwks;
pub mod logout;
pub mod oidc;
pub mod registry;
pub mod tokens;

pub use auth::{AuthOutcome, CallbackParams, OpenIdAuthenticator};
pub use discovery::MetadataResolver;
pub use http::{HttpTransport, ReqwestTransport};
pub use logout::{LogoutAction, logout};
pub use oidc::ProviderMetadata;
pub use registry::{ProviderRegistry, ProviderSummary, sanitize_action};
pub use tokens::TokenSet;

#[cfg(any(test, feature = "test-utils"))]
pub use http::{RecordedRequest, ScriptedResponse, ScriptedTransport};
