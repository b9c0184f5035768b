//! Claim retrieval after the token exchange.
//!
//! Claims come from one of three places, chosen per provider:
//!
//! - the user-info endpoint, called with the access token as bearer
//! - the introspection endpoint (RFC 7662), where `active = false` fails the attempt
//! - the ID token, whose signature, issuer, audience, expiry and nonce are verified

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use url::Url;

use super::http::{HttpTransport, endpoint_host};
use super::jwks::{fetch_jwks, select_key};
use super::oidc::ProviderMetadata;
use super::tokens::provider_error;
use crate::config::ProviderConfig;
use crate::error::{AuthError, ProtocolError};
use crate::identity::Claims;

/// Clock skew tolerated when checking `exp`, in seconds.
pub const ID_TOKEN_LEEWAY_SECS: u64 = 60;

/// Fetches claims from the user-info endpoint.
///
/// # Errors
///
/// Returns a transport error, or a protocol error if the body is an OAuth
/// error.
pub async fn fetch_userinfo(
    transport: &dyn HttpTransport,
    endpoint: &Url,
    access_token: &str,
) -> Result<Claims, AuthError> {
    tracing::debug!(endpoint = %endpoint_host(endpoint), "Fetching user info");
    let body = transport.get_json(endpoint, Some(access_token)).await?;
    if let Some(err) = provider_error(&body) {
        return Err(err.into());
    }
    Ok(body)
}

/// Introspects the access token and returns the introspection response.
///
/// # Errors
///
/// Returns a transport error, a protocol error for an OAuth error body, or
/// `InactiveToken` unless the response has `"active": true`.
pub async fn introspect(
    transport: &dyn HttpTransport,
    endpoint: &Url,
    provider: &ProviderConfig,
    access_token: &str,
) -> Result<Claims, AuthError> {
    let mut params = vec![
        ("client_id", provider.client_id.as_str()),
        ("token", access_token),
        ("token_type_hint", "access_token"),
    ];
    if let Some(secret) = &provider.client_secret {
        params.push(("client_secret", secret.as_str()));
    }

    tracing::debug!(endpoint = %endpoint_host(endpoint), "Introspecting access token");
    let body = transport.post_form(endpoint, &params).await?;
    if let Some(err) = provider_error(&body) {
        return Err(err.into());
    }

    if body.get("active").and_then(serde_json::Value::as_bool) != Some(true) {
        return Err(ProtocolError::InactiveToken.into());
    }
    Ok(body)
}

/// Verifies an ID token and returns its claims.
///
/// HMAC-signed tokens are checked with the client secret (OpenID Connect Core
/// 10.1). Any other algorithm needs a key from the provider's JWKS, selected
/// by `kid` and algorithm. `aud` must contain the client identifier, `iss`
/// must equal the provider issuer and `exp` is checked with
/// [`ID_TOKEN_LEEWAY_SECS`] of tolerance. The `nonce` claim must equal the one
/// sent with the authorization request.
///
/// # Errors
///
/// Returns `InvalidIdToken` for a malformed or badly signed token,
/// `NoSigningKey` when the JWKS has no usable key, `AudienceMismatch`,
/// `IssuerMismatch`, `IdTokenExpired` or `NonceMismatch` for failed checks,
/// and a transport error if the JWKS cannot be fetched.
pub async fn verify_id_token(
    transport: &dyn HttpTransport,
    metadata: &ProviderMetadata,
    provider: &ProviderConfig,
    id_token: &str,
    expected_nonce: &str,
) -> Result<Claims, AuthError> {
    let header = decode_header(id_token).map_err(|e| ProtocolError::InvalidIdToken(e.to_string()))?;
    let issuer = metadata
        .issuer
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or(ProtocolError::MissingEndpoint("issuer"))?;

    let key = match header.alg {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            let secret = provider
                .client_secret
                .as_deref()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    ProtocolError::InvalidIdToken(
                        "HMAC-signed ID token but no client secret is configured".to_string(),
                    )
                })?;
            DecodingKey::from_secret(secret.as_bytes())
        }
        _ => {
            let jwks_uri = metadata.require_jwks_uri()?;
            let jwks = fetch_jwks(transport, &jwks_uri).await?;
            select_key(&jwks, &header).ok_or(ProtocolError::NoSigningKey)?
        }
    };

    let mut validation = Validation::new(header.alg);
    validation.set_audience(&[provider.client_id.as_str()]);
    validation.set_issuer(&[issuer]);
    validation.set_required_spec_claims(&["exp", "aud", "iss"]);
    validation.leeway = ID_TOKEN_LEEWAY_SECS;

    let claims = decode::<Claims>(id_token, &key, &validation)
        .map_err(id_token_error)?
        .claims;

    if claims.get("nonce").and_then(serde_json::Value::as_str) != Some(expected_nonce) {
        return Err(ProtocolError::NonceMismatch.into());
    }

    tracing::debug!(provider = %provider.id, alg = ?header.alg, "Verified ID token");
    Ok(claims)
}

fn id_token_error(e: jsonwebtoken::errors::Error) -> ProtocolError {
    match e.kind() {
        ErrorKind::ExpiredSignature => ProtocolError::IdTokenExpired,
        ErrorKind::InvalidAudience => ProtocolError::AudienceMismatch,
        ErrorKind::InvalidIssuer => ProtocolError::IssuerMismatch,
        _ => ProtocolError::InvalidIdToken(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetadataSource;
    use crate::federation::http::ScriptedTransport;
    use crate::federation::jwks::tests::test_jwks;
    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    const ISSUER: &str = "https://idp.example.com";
    const JWKS_URI: &str = "https://idp.example.com/keys";

    fn metadata() -> ProviderMetadata {
        ProviderMetadata {
            issuer: Some(ISSUER.to_string()),
            jwks_uri: Some(JWKS_URI.to_string()),
            ..ProviderMetadata::default()
        }
    }

    fn now() -> i64 {
        time::OffsetDateTime::now_utc().unix_timestamp()
    }

    fn payload(overrides: serde_json::Value) -> serde_json::Value {
        let mut claims = json!({
            "iss": ISSUER,
            "sub": "248289761001",
            "aud": "client-1",
            "exp": now() + 300,
            "nonce": "n-1",
            "email": "a@b.com"
        });
        if let (Some(claims), Some(overrides)) = (claims.as_object_mut(), overrides.as_object()) {
            claims.extend(overrides.clone());
        }
        claims
    }

    fn hs256(claims: &serde_json::Value, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn rs256(claims: &serde_json::Value, kid: &str) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        let key =
            EncodingKey::from_rsa_pem(include_bytes!("../../testdata/idp_rsa_key.pem")).unwrap();
        encode(&header, claims, &key).unwrap()
    }

    async fn verify(token: &str) -> Result<Claims, AuthError> {
        let transport = ScriptedTransport::new().with_json(JWKS_URI, test_jwks());
        verify_id_token(&transport, &metadata(), &provider(), token, "n-1").await
    }

    fn protocol_error(result: Result<Claims, AuthError>) -> ProtocolError {
        match result {
            Err(AuthError::Protocol(e)) => e,
            other => panic!("expected a protocol error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_verify_hmac_signed_id_token() {
        let claims = verify(&hs256(&payload(json!({})), "s3cret")).await.unwrap();
        assert_eq!(claims["email"], "a@b.com");

        let array_aud = payload(json!({"aud": ["other", "client-1"]}));
        assert!(verify(&hs256(&array_aud, "s3cret")).await.is_ok());
    }

    #[tokio::test]
    async fn test_verify_rsa_signed_id_token_from_jwks() {
        let claims = verify(&rs256(&payload(json!({})), "k1")).await.unwrap();
        assert_eq!(claims["sub"], "248289761001");

        assert!(matches!(
            protocol_error(verify(&rs256(&payload(json!({})), "rotated")).await),
            ProtocolError::NoSigningKey
        ));
    }

    #[tokio::test]
    async fn test_unsigned_token_from_foreign_issuer_is_rejected() {
        let forged = format!(
            "{}.{}.",
            URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(payload(json!({"iss": "https://evil.example"})).to_string())
        );
        assert!(matches!(
            protocol_error(verify(&forged).await),
            ProtocolError::InvalidIdToken(_)
        ));
    }

    #[tokio::test]
    async fn test_bad_signature_is_rejected() {
        let token = hs256(&payload(json!({})), "not-the-secret");
        assert!(matches!(
            protocol_error(verify(&token).await),
            ProtocolError::InvalidIdToken(_)
        ));

        let signed = rs256(&payload(json!({})), "k1");
        let segments: Vec<&str> = signed.split('.').collect();
        let swapped = URL_SAFE_NO_PAD.encode(payload(json!({"email": "root@b.com"})).to_string());
        let tampered = format!("{}.{swapped}.{}", segments[0], segments[2]);
        assert!(matches!(
            protocol_error(verify(&tampered).await),
            ProtocolError::InvalidIdToken(_)
        ));
    }

    #[tokio::test]
    async fn test_id_token_claim_checks() {
        let foreign = hs256(&payload(json!({"iss": "https://evil.example"})), "s3cret");
        assert!(matches!(
            protocol_error(verify(&foreign).await),
            ProtocolError::IssuerMismatch
        ));

        let wrong_aud = hs256(&payload(json!({"aud": "other"})), "s3cret");
        assert!(matches!(
            protocol_error(verify(&wrong_aud).await),
            ProtocolError::AudienceMismatch
        ));

        let within_leeway = hs256(&payload(json!({"exp": now() - 30})), "s3cret");
        assert!(verify(&within_leeway).await.is_ok());

        let expired = hs256(&payload(json!({"exp": now() - 300})), "s3cret");
        assert!(matches!(
            protocol_error(verify(&expired).await),
            ProtocolError::IdTokenExpired
        ));

        let other_nonce = hs256(&payload(json!({"nonce": "n-2"})), "s3cret");
        assert!(matches!(
            protocol_error(verify(&other_nonce).await),
            ProtocolError::NonceMismatch
        ));

        let mut no_nonce = payload(json!({}));
        no_nonce.as_object_mut().unwrap().remove("nonce");
        assert!(matches!(
            protocol_error(verify(&hs256(&no_nonce, "s3cret")).await),
            ProtocolError::NonceMismatch
        ));
    }

    #[tokio::test]
    async fn test_malformed_id_token() {
        for token in ["", "a.b", "a.!!!.c"] {
            assert!(matches!(
                protocol_error(verify(token).await),
                ProtocolError::InvalidIdToken(_)
            ));
        }
    }

    #[tokio::test]
    async fn test_asymmetric_token_needs_jwks_uri() {
        let transport = ScriptedTransport::new();
        let metadata = ProviderMetadata {
            issuer: Some(ISSUER.to_string()),
            ..ProviderMetadata::default()
        };
        let token = rs256(&payload(json!({})), "k1");
        let result = verify_id_token(&transport, &metadata, &provider(), &token, "n-1").await;
        assert!(matches!(
            protocol_error(result),
            ProtocolError::MissingEndpoint("JWKS URI")
        ));
    }

    fn provider() -> ProviderConfig {
        ProviderConfig::new(
            "okta",
            "client-1",
            "https://cb",
            "username=username",
            MetadataSource::discovery("idp.example.com"),
        )
        .with_client_secret("s3cret")
    }

    #[tokio::test]
    async fn test_introspection_inactive_token() {
        let url = Url::parse("https://idp.example.com/introspect").unwrap();
        for body in [json!({"active": false}), json!({"username": "a"})] {
            let transport = ScriptedTransport::new().with_json(url.as_str(), body);
            let err = introspect(&transport, &url, &provider(), "T").await.unwrap_err();
            assert!(matches!(
                err,
                AuthError::Protocol(ProtocolError::InactiveToken)
            ));
        }
    }

    #[tokio::test]
    async fn test_introspection_sends_credentials() {
        let url = Url::parse("https://idp.example.com/introspect").unwrap();
        let transport = ScriptedTransport::new()
            .with_json(url.as_str(), json!({"active": true, "username": "a@b.com"}));

        let claims = introspect(&transport, &url, &provider(), "T").await.unwrap();
        assert_eq!(claims["username"], "a@b.com");

        let request = &transport.requests()[0];
        assert_eq!(request.form_value("token"), Some("T"));
        assert_eq!(request.form_value("client_id"), Some("client-1"));
        assert_eq!(request.form_value("client_secret"), Some("s3cret"));
    }

    #[tokio::test]
    async fn test_userinfo_error_body() {
        let url = Url::parse("https://idp.example.com/userinfo").unwrap();
        let transport = ScriptedTransport::new()
            .with_json(url.as_str(), json!({"error": "invalid_token"}));
        let err = fetch_userinfo(&transport, &url, "T").await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::Protocol(ProtocolError::ProviderError { .. })
        ));
    }
}
