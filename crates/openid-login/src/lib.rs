//! # openid-login
//!
//! OpenID Connect login for local user accounts.
//!
//! This crate provides:
//! - The authorization-code flow with PKCE and CSRF state
//! - Provider metadata from discovery documents, RFC 8414 metadata or static paths
//! - Claims from user info, token introspection or the ID token
//! - Mapping of a provider claim to exactly one enabled local user
//! - RP-initiated logout
//!
//! ## Overview
//!
//! The flow spans several HTTP requests. Transient state lives behind the
//! [`session::SessionStore`] port, outbound calls go through
//! [`federation::HttpTransport`] and local users are read through
//! [`identity::IdentityStore`], so the whole state machine runs without a web
//! server or a database.
//!
//! ## Modules
//!
//! - [`config`] - Provider and feature settings
//! - [`error`] - Error taxonomy
//! - [`oauth`] - PKCE, state and nonce generation
//! - [`session`] - Session-state port and pending attempts
//! - [`identity`] - Claim mapping and the identity-store port
//! - [`federation`] - Provider interaction and the login state machine
//! - [`result`] - The authentication result

pub mod config;
pub mod error;
pub mod federation;
pub mod identity;
pub mod oauth;
pub mod result;
pub mod session;

pub use config::{ClaimSource, MetadataSource, OpenIdSettings, ProviderConfig};
pub use error::{
    AuthError, AuthResult, ConfigError, Disposition, ErrorCategory, ProtocolError, StorageError,
    TransportError,
};
pub use federation::{
    AuthOutcome, CallbackParams, HttpTransport, LogoutAction, OpenIdAuthenticator,
    ProviderRegistry, ProviderSummary, ReqwestTransport,
};
pub use identity::{IdentityStore, LocalUser, MemoryIdentityStore, MemoryUser};
pub use result::AuthenticationResult;
pub use session::{MemorySession, PendingAttempt, SessionStore};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use openid_login::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ClaimSource, MetadataSource, OpenIdSettings, ProviderConfig};
    pub use crate::error::{AuthError, AuthResult, Disposition, ErrorCategory};
    pub use crate::federation::{
        AuthOutcome, CallbackParams, LogoutAction, OpenIdAuthenticator, ProviderRegistry,
    };
    pub use crate::identity::{IdentityStore, LocalUser};
    pub use crate::result::AuthenticationResult;
    pub use crate::session::SessionStore;
}
