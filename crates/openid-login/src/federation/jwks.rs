//! Signing key selection for ID token verification.
//!
//! Keys are fetched from the provider's `jwks_uri` once per attempt and never
//! cached.
//!
//! A key is eligible for a token when it is not marked for encryption, its
//! key type matches the header algorithm, and its own `alg` (if published)
//! equals the header algorithm. When the header names a `kid` only that key
//! is considered.

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey, Header};
use url::Url;

use super::http::{HttpTransport, endpoint_host};
use crate::error::{AuthError, ProtocolError};

/// Fetches the provider's key set.
///
/// # Errors
///
/// Returns a transport error, or `InvalidIdToken` if the body is not a JWKS.
pub async fn fetch_jwks(
    transport: &dyn HttpTransport,
    jwks_uri: &Url,
) -> Result<JwkSet, AuthError> {
    tracing::debug!(endpoint = %endpoint_host(jwks_uri), "Fetching provider JWKS");
    let body = transport.get_json(jwks_uri, None).await?;
    serde_json::from_value(serde_json::Value::Object(body)).map_err(|e| {
        ProtocolError::InvalidIdToken(format!("provider JWKS is invalid: {e}")).into()
    })
}

/// Picks the key that verifies a token with this header.
///
/// Returns `None` when no eligible key exists.
#[must_use]
pub fn select_key(jwks: &JwkSet, header: &Header) -> Option<DecodingKey> {
    jwks.keys
        .iter()
        .filter(|jwk| match header.kid.as_deref() {
            Some(kid) => jwk.common.key_id.as_deref() == Some(kid),
            None => true,
        })
        .filter(|jwk| is_signing_key_for(jwk, header.alg))
        .find_map(|jwk| DecodingKey::from_jwk(jwk).ok())
}

fn is_signing_key_for(jwk: &Jwk, alg: Algorithm) -> bool {
    if matches!(&jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
        return false;
    }
    if jwk_algorithm(jwk).is_some_and(|key_alg| key_alg != alg) {
        return false;
    }
    match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => matches!(
            alg,
            Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512
        ),
        AlgorithmParameters::EllipticCurve(_) => {
            matches!(alg, Algorithm::ES256 | Algorithm::ES384)
        }
        AlgorithmParameters::OctetKeyPair(_) => alg == Algorithm::EdDSA,
        // Shared secrets come from the client configuration, never from the provider.
        _ => false,
    }
}

fn jwk_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    jwk.common.key_algorithm.as_ref().and_then(|alg| match alg {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Public half of `testdata/idp_rsa_key.pem`.
    pub(crate) const TEST_RSA_N: &str = "8U0r9qnL_xhm9RWCtL2bn2dAHeeG6h7naUWZiVP14N0DrVt6-redOV2HDpApfxXiRevEZZLLHjYPN7yqj2FSN4KKpTWbxGECV9QNMuAlGC2GmpjqKfaccO4YG_DEQVihrCxpCVA_D2G0z_IjEbyIIjtbLzW4hx4rlqVZJoHB_mcOG0UwZfVPTmF54hkZH88oWWVIfC44s6yzxqXidEnrSWMwvAH9_QtWMJ5LclWjCNhz9DAT3U8SgXW_sLqel5UtZ-4T2rUu06sNqe_T0foQOPM5YnuaGu-reSn_n9mzyPkrLfvR3o_B-0tvQH6Ds1ZqtqpYURfswWqia54afzHM5Q";

    pub(crate) fn test_jwks() -> serde_json::Value {
        json!({
            "keys": [
                {"kty": "RSA", "kid": "enc", "use": "enc", "n": TEST_RSA_N, "e": "AQAB"},
                {"kty": "RSA", "kid": "k1", "use": "sig", "alg": "RS256", "n": TEST_RSA_N, "e": "AQAB"}
            ]
        })
    }

    fn jwks() -> JwkSet {
        serde_json::from_value(test_jwks()).unwrap()
    }

    fn header(alg: Algorithm, kid: Option<&str>) -> Header {
        let mut header = Header::new(alg);
        header.kid = kid.map(str::to_string);
        header
    }

    #[test]
    fn test_select_key_by_kid() {
        assert!(select_key(&jwks(), &header(Algorithm::RS256, Some("k1"))).is_some());
        assert!(select_key(&jwks(), &header(Algorithm::RS256, Some("other"))).is_none());
    }

    #[test]
    fn test_encryption_keys_are_skipped() {
        assert!(select_key(&jwks(), &header(Algorithm::RS256, Some("enc"))).is_none());
    }

    #[test]
    fn test_without_kid_first_matching_key_is_used() {
        assert!(select_key(&jwks(), &header(Algorithm::RS256, None)).is_some());
    }

    #[test]
    fn test_algorithm_must_match_key() {
        assert!(select_key(&jwks(), &header(Algorithm::RS384, Some("k1"))).is_none());
        assert!(select_key(&jwks(), &header(Algorithm::ES256, None)).is_none());
        assert!(select_key(&jwks(), &header(Algorithm::HS256, None)).is_none());
    }
}
