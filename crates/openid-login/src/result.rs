//! The normalized outcome of a login attempt.

use serde::Serialize;

use crate::identity::LocalUser;

/// Outcome handed to the session-creation collaborator.
///
/// Either every identity field is populated and `authorized` is `true`, or
/// `authorized` is `false` and nothing else is set. The fields are private so
/// no other combination can be constructed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthenticationResult {
    authorized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    plugin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    domain_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    domain_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_email: Option<String>,
}

impl AuthenticationResult {
    /// The negative result.
    #[must_use]
    pub fn denied() -> Self {
        Self::default()
    }

    /// A positive result for a resolved local user.
    #[must_use]
    pub fn authorized(plugin: impl Into<String>, user: LocalUser, user_email: String) -> Self {
        Self {
            authorized: true,
            plugin: Some(plugin.into()),
            user_uuid: Some(user.user_uuid),
            username: Some(user.username),
            domain_uuid: Some(user.domain_uuid),
            domain_name: Some(user.domain_name),
            user_email: Some(user_email),
        }
    }

    /// Whether the login succeeded.
    #[must_use]
    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    /// Identifier of the provider that authenticated the user.
    #[must_use]
    pub fn plugin(&self) -> Option<&str> {
        self.plugin.as_deref()
    }

    /// Local user identifier.
    #[must_use]
    pub fn user_uuid(&self) -> Option<&str> {
        self.user_uuid.as_deref()
    }

    /// Local login name.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Local tenant identifier.
    #[must_use]
    pub fn domain_uuid(&self) -> Option<&str> {
        self.domain_uuid.as_deref()
    }

    /// Local tenant name.
    #[must_use]
    pub fn domain_name(&self) -> Option<&str> {
        self.domain_name.as_deref()
    }

    /// Email address reported by the provider.
    #[must_use]
    pub fn user_email(&self) -> Option<&str> {
        self.user_email.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    #[test]
    fn test_denied_has_no_fields() {
        let result = AuthenticationResult::denied();
        assert!(!result.is_authorized());
        assert_json_eq!(serde_json::to_value(&result).unwrap(), json!({"authorized": false}));
    }

    #[test]
    fn test_authorized_populates_everything() {
        let user = LocalUser {
            user_uuid: "U".to_string(),
            username: "a".to_string(),
            domain_uuid: "D".to_string(),
            domain_name: "pbx.example.com".to_string(),
        };
        let result = AuthenticationResult::authorized("google", user, "a@b.com".to_string());
        assert_json_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "authorized": true,
                "plugin": "google",
                "user_uuid": "U",
                "username": "a",
                "domain_uuid": "D",
                "domain_name": "pbx.example.com",
                "user_email": "a@b.com"
            })
        );
    }
}
