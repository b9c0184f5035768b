//! Authorization request URL construction.

use url::Url;

use crate::config::ProviderConfig;
use crate::oauth::PkceChallenge;
use crate::session::PendingAttempt;

/// Builds the provider redirect for a pending attempt.
///
/// The query carries `client_id`, `redirect_uri`, `response_type=code`,
/// `scope` and `state`, then `code_challenge`/`code_challenge_method` when the
/// attempt has a PKCE verifier, `nonce` when it has one, and finally the
/// provider's extra parameters. Existing query parameters on the endpoint are
/// kept.
#[must_use]
pub fn build_authorization_url(
    authorization_endpoint: Url,
    provider: &ProviderConfig,
    redirect_uri: &str,
    attempt: &PendingAttempt,
) -> Url {
    let mut url = authorization_endpoint;
    {
        let mut params = url.query_pairs_mut();
        params.append_pair("client_id", &provider.client_id);
        params.append_pair("redirect_uri", redirect_uri);
        params.append_pair("response_type", "code");
        params.append_pair("scope", &provider.scope);
        params.append_pair("state", attempt.state.as_str());

        if let Some(verifier) = &attempt.code_verifier {
            let challenge = PkceChallenge::from_verifier(verifier);
            params.append_pair("code_challenge", challenge.as_str());
            params.append_pair("code_challenge_method", challenge.method().as_str());
        }

        if let Some(nonce) = &attempt.nonce {
            params.append_pair("nonce", nonce);
        }

        for (key, value) in &provider.extra_auth_params {
            params.append_pair(key, value);
        }
    }
    url
}
