//! Mapping external identities to local users.
//!
//! A provider claim is matched against one column of the local users table,
//! configured as `external_claim=local_column` (for example
//! `email=user_email`). The column name is validated once, when the mapper is
//! built; the claim value is always passed to the store as a bound parameter.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult, ConfigError, ProtocolError, StorageError};

/// Claims returned by a provider.
pub type Claims = serde_json::Map<String, serde_json::Value>;

/// Longest identifier PostgreSQL accepts without truncation.
const MAX_IDENTIFIER_LEN: usize = 63;

/// A parsed `external_claim=local_column` rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimMapping {
    external: String,
    local: String,
}

impl ClaimMapping {
    /// Parses a mapping rule.
    ///
    /// # Errors
    ///
    /// Fails unless the rule has exactly one `=`, both sides are non-empty
    /// after trimming, and the local side is a plain identifier.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut parts = raw.split('=');
        let (Some(external), Some(local)) = (parts.next(), parts.next()) else {
            return Err(ConfigError::MalformedMapping);
        };
        if parts.next().is_some() {
            return Err(ConfigError::AmbiguousMapping);
        }

        let external = external.trim();
        let local = local.trim();
        if external.is_empty() {
            return Err(ConfigError::EmptyExternalField);
        }
        if local.is_empty() {
            return Err(ConfigError::EmptyLocalColumn);
        }
        if !is_valid_identifier(local) {
            return Err(ConfigError::InvalidColumnName(local.to_string()));
        }

        Ok(Self {
            external: external.to_string(),
            local: local.to_string(),
        })
    }

    /// Name of the provider claim.
    #[must_use]
    pub fn external_field(&self) -> &str {
        &self.external
    }

    /// Name of the local column.
    #[must_use]
    pub fn local_column(&self) -> &str {
        &self.local
    }
}

/// Returns `true` if `name` is safe to interpolate as a SQL column name.
///
/// Accepts `[A-Za-z_][A-Za-z0-9_]*` up to 63 characters.
#[must_use]
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= MAX_IDENTIFIER_LEN && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Read-only projection of a local user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    /// User identifier.
    pub user_uuid: String,
    /// Login name.
    pub username: String,
    /// Tenant identifier.
    pub domain_uuid: String,
    /// Tenant name.
    pub domain_name: String,
}

/// The claim value used to find the local user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    /// Claim name.
    pub field: String,
    /// Claim value, stringified.
    pub value: String,
}

/// Local user directory.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Whether the users table has the given column.
    ///
    /// Only called with names that passed [`is_valid_identifier`].
    async fn column_exists(&self, column: &str) -> Result<bool, StorageError>;

    /// Finds enabled users whose `column` equals `value`.
    ///
    /// Implementations return at most two rows; more than one row is treated
    /// as an ambiguous match.
    async fn find_enabled_users(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Vec<LocalUser>, StorageError>;
}

/// Resolves provider claims to exactly one local user.
#[derive(Clone)]
pub struct IdentityMapper {
    mapping: ClaimMapping,
    store: Arc<dyn IdentityStore>,
}

impl std::fmt::Debug for IdentityMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityMapper")
            .field("mapping", &self.mapping)
            .finish_non_exhaustive()
    }
}

impl IdentityMapper {
    /// Parses the mapping and checks the column against the store's schema.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a malformed mapping, an unknown
    /// column, or a failed schema check.
    pub async fn new(raw: &str, store: Arc<dyn IdentityStore>) -> Result<Self, ConfigError> {
        let mapping = ClaimMapping::parse(raw)?;
        let exists = store
            .column_exists(mapping.local_column())
            .await
            .map_err(|e| ConfigError::SchemaCheckFailed(e.to_string()))?;
        if !exists {
            return Err(ConfigError::UnknownColumn(mapping.local_column().to_string()));
        }
        Ok(Self { mapping, store })
    }

    /// Extracts the mapped claim.
    ///
    /// # Errors
    ///
    /// Returns `MissingClaim` if the claim is absent, empty, or not a scalar.
    pub fn external_identity(&self, claims: &Claims) -> Result<ExternalIdentity, ProtocolError> {
        let field = self.mapping.external_field();
        claim_as_string(claims, field)
            .map(|value| ExternalIdentity {
                field: field.to_string(),
                value,
            })
            .ok_or_else(|| ProtocolError::MissingClaim(field.to_string()))
    }

    /// Finds the single enabled local user for an external identity.
    ///
    /// # Errors
    ///
    /// Returns `IdentityNotFound` for zero matches, `IdentityAmbiguous` for
    /// more than one, or a storage error.
    pub async fn resolve(&self, identity: &ExternalIdentity) -> AuthResult<LocalUser> {
        let mut users = self
            .store
            .find_enabled_users(self.mapping.local_column(), &identity.value)
            .await?;

        match users.len() {
            0 => Err(AuthError::IdentityNotFound),
            1 => Ok(users.remove(0)),
            _ => {
                tracing::warn!(
                    column = %self.mapping.local_column(),
                    "More than one enabled user matches the mapped claim"
                );
                Err(AuthError::IdentityAmbiguous)
            }
        }
    }
}

/// Reads a scalar claim as a string. Empty strings count as absent.
#[must_use]
pub fn claim_as_string(claims: &Claims, field: &str) -> Option<String> {
    match claims.get(field)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// A user row held by [`MemoryIdentityStore`].
#[derive(Debug, Clone)]
pub struct MemoryUser {
    user: LocalUser,
    enabled: bool,
    attributes: HashMap<String, String>,
}

impl MemoryUser {
    /// Creates an enabled user.
    #[must_use]
    pub fn new(user: LocalUser) -> Self {
        Self {
            user,
            enabled: true,
            attributes: HashMap::new(),
        }
    }

    /// Sets a column value.
    #[must_use]
    pub fn with_attribute(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(column.into(), value.into());
        self
    }

    /// Marks the user as disabled.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn value(&self, column: &str) -> Option<&str> {
        match column {
            "user_uuid" => Some(&self.user.user_uuid),
            "username" => Some(&self.user.username),
            "domain_uuid" => Some(&self.user.domain_uuid),
            _ => self.attributes.get(column).map(String::as_str),
        }
    }
}

/// Identity store kept in memory, for tests and single-node setups.
#[derive(Debug, Clone)]
pub struct MemoryIdentityStore {
    columns: BTreeSet<String>,
    users: Vec<MemoryUser>,
}

impl Default for MemoryIdentityStore {
    fn default() -> Self {
        Self {
            columns: ["user_uuid", "domain_uuid", "username", "user_email", "user_enabled"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            users: Vec::new(),
        }
    }
}

impl MemoryIdentityStore {
    /// Creates a store with the default users columns.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user; its attribute names are added to the schema.
    #[must_use]
    pub fn with_user(mut self, user: MemoryUser) -> Self {
        self.columns.extend(user.attributes.keys().cloned());
        self.users.push(user);
        self
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn column_exists(&self, column: &str) -> Result<bool, StorageError> {
        Ok(self.columns.contains(column))
    }

    async fn find_enabled_users(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Vec<LocalUser>, StorageError> {
        Ok(self
            .users
            .iter()
            .filter(|u| u.enabled && u.value(column) == Some(value))
            .take(2)
            .map(|u| u.user.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(name: &str) -> LocalUser {
        LocalUser {
            user_uuid: format!("{name}-uuid"),
            username: name.to_string(),
            domain_uuid: "D".to_string(),
            domain_name: "pbx.example.com".to_string(),
        }
    }

    fn claims(value: serde_json::Value) -> Claims {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parse_mapping() {
        let m = ClaimMapping::parse(" email = user_email ").unwrap();
        assert_eq!(m.external_field(), "email");
        assert_eq!(m.local_column(), "user_email");
    }

    #[test]
    fn test_parse_mapping_errors() {
        assert!(matches!(
            ClaimMapping::parse("email"),
            Err(ConfigError::MalformedMapping)
        ));
        assert!(matches!(
            ClaimMapping::parse(""),
            Err(ConfigError::MalformedMapping)
        ));
        assert!(matches!(
            ClaimMapping::parse("a=b=c"),
            Err(ConfigError::AmbiguousMapping)
        ));
        assert!(matches!(
            ClaimMapping::parse(" =user_email"),
            Err(ConfigError::EmptyExternalField)
        ));
        assert!(matches!(
            ClaimMapping::parse("email= "),
            Err(ConfigError::EmptyLocalColumn)
        ));
        assert!(matches!(
            ClaimMapping::parse("email=user_email; drop table v_users"),
            Err(ConfigError::InvalidColumnName(_))
        ));
    }

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("user_email"));
        assert!(is_valid_identifier("_col2"));
        assert!(!is_valid_identifier("2col"));
        assert!(!is_valid_identifier("user-email"));
        assert!(!is_valid_identifier("user\"email"));
        assert!(!is_valid_identifier(&"a".repeat(64)));
        assert!(!is_valid_identifier(""));
    }

    #[tokio::test]
    async fn test_unknown_column_rejected() {
        let store = Arc::new(MemoryIdentityStore::new());
        let err = IdentityMapper::new("email=missing_column", store)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownColumn(c) if c == "missing_column"));
    }

    #[tokio::test]
    async fn test_resolve_single_user() {
        let store = MemoryIdentityStore::new()
            .with_user(MemoryUser::new(user("a")).with_attribute("user_email", "a@b.com"));
        let mapper = IdentityMapper::new("email=user_email", Arc::new(store))
            .await
            .unwrap();

        let identity = mapper
            .external_identity(&claims(json!({"email": "a@b.com"})))
            .unwrap();
        let found = mapper.resolve(&identity).await.unwrap();
        assert_eq!(found, user("a"));
    }

    #[tokio::test]
    async fn test_resolve_ignores_disabled_and_reports_none() {
        let store = MemoryIdentityStore::new().with_user(
            MemoryUser::new(user("a"))
                .with_attribute("user_email", "a@b.com")
                .disabled(),
        );
        let mapper = IdentityMapper::new("email=user_email", Arc::new(store))
            .await
            .unwrap();
        let identity = ExternalIdentity {
            field: "email".to_string(),
            value: "a@b.com".to_string(),
        };
        assert!(matches!(
            mapper.resolve(&identity).await,
            Err(AuthError::IdentityNotFound)
        ));
    }

    #[tokio::test]
    async fn test_resolve_rejects_duplicates() {
        let store = MemoryIdentityStore::new()
            .with_user(MemoryUser::new(user("a")).with_attribute("user_email", "x@b.com"))
            .with_user(MemoryUser::new(user("b")).with_attribute("user_email", "x@b.com"));
        let mapper = IdentityMapper::new("email=user_email", Arc::new(store))
            .await
            .unwrap();
        let identity = ExternalIdentity {
            field: "email".to_string(),
            value: "x@b.com".to_string(),
        };
        assert!(matches!(
            mapper.resolve(&identity).await,
            Err(AuthError::IdentityAmbiguous)
        ));
    }

    #[tokio::test]
    async fn test_missing_or_non_scalar_claim() {
        let mapper = IdentityMapper::new("sub=username", Arc::new(MemoryIdentityStore::new()))
            .await
            .unwrap();
        for value in [json!({}), json!({"sub": ""}), json!({"sub": ["a"]})] {
            assert!(matches!(
                mapper.external_identity(&claims(value)),
                Err(ProtocolError::MissingClaim(f)) if f == "sub"
            ));
        }
        let identity = mapper.external_identity(&claims(json!({"sub": 42}))).unwrap();
        assert_eq!(identity.value, "42");
    }
}
