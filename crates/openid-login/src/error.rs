//! Login error types.
//!
//! Errors are grouped the way the login flow treats them:
//!
//! - [`ConfigError`] - raised once, when an authenticator is constructed
//! - [`TransportError`] - the provider could not be reached or answered garbage
//! - [`ProtocolError`] - the round trip was invalid (tampering or misconfiguration)
//! - [`StorageError`] - the identity store or the session store failed
//!
//! [`AuthError`] aggregates them for a single attempt. Every variant ends the
//! attempt without a positive result; [`AuthError::disposition`] tells the
//! boundary layer whether to show the generic failed-login outcome or to
//! terminate the response.

use std::fmt;

use crate::oauth::PkceError;

/// Configuration problems detected while constructing an authenticator.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required setting is missing or empty.
    #[error("{0} must not be empty")]
    MissingSetting(String),

    /// The username mapping has no `=` separator.
    #[error("username mapping must be in the form external_claim=local_column")]
    MalformedMapping,

    /// The username mapping has more than one `=` separator.
    #[error("username mapping must contain exactly one '=' separator")]
    AmbiguousMapping,

    /// The external claim name is empty after trimming.
    #[error("external claim name must not be empty in the username mapping")]
    EmptyExternalField,

    /// The local column name is empty after trimming.
    #[error("local column must not be empty in the username mapping")]
    EmptyLocalColumn,

    /// The local column is not a plain SQL identifier.
    #[error("local column {0} is not a valid column name")]
    InvalidColumnName(String),

    /// The local column does not exist in the users table.
    #[error("local column {0} does not exist in the users table")]
    UnknownColumn(String),

    /// The users table schema could not be inspected.
    #[error("failed to inspect the users table: {0}")]
    SchemaCheckFailed(String),

    /// A configured URL is invalid.
    #[error("invalid URL for {setting}: {message}")]
    InvalidUrl {
        /// The setting holding the URL.
        setting: String,
        /// Why the URL was rejected.
        message: String,
    },

    /// Two providers share the same identifier.
    #[error("duplicate provider identifier: {0}")]
    DuplicateProvider(String),
}

impl ConfigError {
    /// Creates a `MissingSetting` error.
    #[must_use]
    pub fn missing(setting: impl Into<String>) -> Self {
        Self::MissingSetting(setting.into())
    }

    /// Creates an `InvalidUrl` error.
    #[must_use]
    pub fn invalid_url(setting: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            setting: setting.into(),
            message: message.into(),
        }
    }
}

/// Failures talking to the provider.
///
/// `endpoint` fields only carry the host of the remote URL.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent or the connection failed.
    #[error("request to {endpoint} failed: {message}")]
    Request {
        /// Host of the endpoint.
        endpoint: String,
        /// Underlying error message.
        message: String,
    },

    /// The request timed out.
    #[error("request to {endpoint} timed out")]
    Timeout {
        /// Host of the endpoint.
        endpoint: String,
    },

    /// The response body was not a JSON object.
    #[error("{endpoint} returned a non-JSON body (HTTP {status})")]
    InvalidBody {
        /// Host of the endpoint.
        endpoint: String,
        /// HTTP status code of the response.
        status: u16,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Invalid or failed authorization round trips.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A callback arrived but the session holds no pending attempt.
    #[error("no login attempt is pending for this session")]
    NoPendingAttempt,

    /// The stored pending attempt is unreadable.
    #[error("stored login attempt is invalid: {0}")]
    InvalidPendingAttempt(String),

    /// The pending attempt outlived its time-to-live.
    #[error("login attempt expired")]
    AttemptExpired,

    /// The callback carried no `state` parameter.
    #[error("authorization server returned no state parameter")]
    MissingState,

    /// The callback `state` differs from the stored state.
    #[error("authorization server returned an invalid state parameter")]
    StateMismatch,

    /// A second initiation arrived while the previous one was still in progress.
    #[error("redirect loop detected")]
    RedirectLoop,

    /// The provider reported an error on the callback or in a response body.
    #[error("authorization server returned an error: {error}")]
    ProviderError {
        /// OAuth error code.
        error: String,
        /// Optional error description.
        description: Option<String>,
    },

    /// Provider metadata did not include a required endpoint.
    #[error("provider metadata is missing the {0}")]
    MissingEndpoint(&'static str),

    /// A provider endpoint is not a valid URL.
    #[error("provider {0} is not a valid URL")]
    InvalidEndpoint(&'static str),

    /// The token response had no access token.
    #[error("token response did not include an access token")]
    MissingAccessToken,

    /// The token response had no ID token while one was required.
    #[error("token response did not include an ID token")]
    MissingIdToken,

    /// The ID token could not be decoded or failed validation.
    #[error("invalid ID token: {0}")]
    InvalidIdToken(String),

    /// The ID token nonce does not match the attempt's nonce.
    #[error("ID token nonce does not match")]
    NonceMismatch,

    /// The ID token audience does not include our client identifier.
    #[error("ID token audience does not include the client identifier")]
    AudienceMismatch,

    /// The ID token is expired.
    #[error("ID token has expired")]
    IdTokenExpired,

    /// The ID token was issued by someone other than the provider.
    #[error("ID token issuer does not match the provider")]
    IssuerMismatch,

    /// No key in the provider's JWKS can verify the ID token.
    #[error("no signing key found for the ID token")]
    NoSigningKey,

    /// Introspection reported the access token as inactive.
    #[error("access token is not active")]
    InactiveToken,

    /// The claim named by the username mapping is absent.
    #[error("claim {0} is missing from the provider response")]
    MissingClaim(String),
}

impl ProtocolError {
    /// Creates a `ProviderError`.
    #[must_use]
    pub fn provider_error(error: impl Into<String>, description: Option<String>) -> Self {
        Self::ProviderError {
            error: error.into(),
            description,
        }
    }

    /// Returns `true` for conditions that indicate tampering or a broken
    /// redirect setup rather than an ordinary failed login.
    #[must_use]
    pub fn is_suspicious(&self) -> bool {
        matches!(
            self,
            Self::NoPendingAttempt
                | Self::MissingState
                | Self::StateMismatch
                | Self::RedirectLoop
                | Self::ProviderError { .. }
        )
    }
}

impl From<PkceError> for ProtocolError {
    fn from(err: PkceError) -> Self {
        Self::InvalidPendingAttempt(err.to_string())
    }
}

/// Identity store and session store failures.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The identity database failed.
    #[error("Database error: {0}")]
    Database(String),
}

/// Any error that ends a login attempt.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Configuration error.
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// Provider could not be reached.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Invalid round trip.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// No enabled local user matches the mapped claim.
    #[error("no enabled local user matches the external identity")]
    IdentityNotFound,

    /// More than one enabled local user matches the mapped claim.
    #[error("more than one local user matches the external identity")]
    IdentityAmbiguous,

    /// Identity or session storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// What the boundary layer should do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Show the generic failed-login outcome (`authorized = false`).
    Deny,
    /// Terminate the response with a short message.
    Abort,
}

impl AuthError {
    /// Returns the error category.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Transport(_) => ErrorCategory::Transport,
            Self::Protocol(_) => ErrorCategory::Protocol,
            Self::IdentityNotFound | Self::IdentityAmbiguous => ErrorCategory::Identity,
            Self::Storage(_) => ErrorCategory::Storage,
        }
    }

    /// Decide how the failed attempt is surfaced.
    #[must_use]
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Protocol(err) if err.is_suspicious() => Disposition::Abort,
            _ => Disposition::Deny,
        }
    }

    /// A message safe to show to the end user.
    ///
    /// Never includes endpoints, tokens or other internal details.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Protocol(ProtocolError::RedirectLoop) => "Unable to redirect",
            Self::Protocol(
                ProtocolError::MissingState
                | ProtocolError::StateMismatch
                | ProtocolError::NoPendingAttempt,
            ) => "Authorization server returned an invalid state parameter",
            Self::Protocol(ProtocolError::ProviderError { .. }) => {
                "Authorization server returned an error"
            }
            _ => "Login failed",
        }
    }

    /// Returns `true` if the failure is the ordinary "no such user" outcome.
    #[must_use]
    pub fn is_identity_error(&self) -> bool {
        matches!(self, Self::IdentityNotFound | Self::IdentityAmbiguous)
    }
}

/// Broad category of a login error, used for structured logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Construction-time configuration.
    Configuration,
    /// Network or response format.
    Transport,
    /// Invalid round trip.
    Protocol,
    /// Local identity resolution.
    Identity,
    /// Identity or session storage.
    Storage,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Transport => write!(f, "transport"),
            Self::Protocol => write!(f, "protocol"),
            Self::Identity => write!(f, "identity"),
            Self::Storage => write!(f, "storage"),
        }
    }
}

/// Result type for login operations.
pub type AuthResult<T> = Result<T, AuthError>;
