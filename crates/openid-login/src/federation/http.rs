//! HTTP transport port.
//!
//! Every outbound call to a provider goes through [`HttpTransport`]. Both
//! operations return the parsed JSON object regardless of the HTTP status, so
//! OAuth error bodies (`{"error": ...}`) reach the protocol layer. A body that
//! is not a JSON object, a connection failure or a timeout is a
//! [`TransportError`]. There are no retries.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::TransportError;

/// A JSON object returned by a provider.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// Outbound HTTP calls to a provider.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// `GET` a JSON document, optionally with a bearer token.
    async fn get_json(
        &self,
        url: &Url,
        bearer: Option<&str>,
    ) -> Result<JsonObject, TransportError>;

    /// `POST` an `application/x-www-form-urlencoded` body and parse the JSON reply.
    async fn post_form(
        &self,
        url: &Url,
        form: &[(&str, &str)],
    ) -> Result<JsonObject, TransportError>;
}

/// Host part of a URL, the only part of an endpoint that is logged or
/// reported.
#[must_use]
pub fn endpoint_host(url: &Url) -> String {
    url.host_str().unwrap_or("unknown").to_string()
}

/// [`HttpTransport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("openid-login/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    async fn send(
        &self,
        url: &Url,
        request: reqwest::RequestBuilder,
    ) -> Result<JsonObject, TransportError> {
        let endpoint = endpoint_host(url);
        let response = request
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| map_reqwest_error(&endpoint, e))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(&endpoint, e))?;

        match serde_json::from_slice::<serde_json::Value>(&body) {
            Ok(serde_json::Value::Object(map)) => {
                tracing::debug!(endpoint = %endpoint, status, "Provider responded");
                Ok(map)
            }
            _ => Err(TransportError::InvalidBody { endpoint, status }),
        }
    }
}

fn map_reqwest_error(endpoint: &str, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            endpoint: endpoint.to_string(),
        }
    } else {
        // reqwest errors embed the full URL; keep only the cause chain's kind.
        TransportError::Request {
            endpoint: endpoint.to_string(),
            message: request_error_kind(&err).to_string(),
        }
    }
}

fn request_error_kind(err: &reqwest::Error) -> &'static str {
    if err.is_connect() {
        "connection failed"
    } else if err.is_redirect() {
        "too many redirects"
    } else if err.is_body() || err.is_decode() {
        "failed to read response body"
    } else {
        "request failed"
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get_json(
        &self,
        url: &Url,
        bearer: Option<&str>,
    ) -> Result<JsonObject, TransportError> {
        let mut request = self.client.get(url.clone());
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        self.send(url, request).await
    }

    async fn post_form(
        &self,
        url: &Url,
        form: &[(&str, &str)],
    ) -> Result<JsonObject, TransportError> {
        let request = self.client.post(url.clone()).form(form);
        self.send(url, request).await
    }
}

// =============================================================================
// Scripted transport
// =============================================================================

#[cfg(any(test, feature = "test-utils"))]
pub use scripted::{RecordedRequest, ScriptedResponse, ScriptedTransport};

#[cfg(any(test, feature = "test-utils"))]
mod scripted {
    use std::collections::HashMap;
    use std::sync::{Mutex, PoisonError};

    use super::*;

    /// A canned reply.
    #[derive(Debug, Clone)]
    pub enum ScriptedResponse {
        /// A JSON body.
        Json(serde_json::Value),
        /// The call times out.
        Timeout,
        /// The body is not JSON.
        NotJson,
    }

    /// A request seen by [`ScriptedTransport`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RecordedRequest {
        /// `GET` or `POST`.
        pub method: &'static str,
        /// Full request URL.
        pub url: String,
        /// Bearer token, for `GET`.
        pub bearer: Option<String>,
        /// Form fields, for `POST`.
        pub form: Vec<(String, String)>,
    }

    impl RecordedRequest {
        /// Value of a form field.
        #[must_use]
        pub fn form_value(&self, key: &str) -> Option<&str> {
            self.form
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        }
    }

    /// In-memory transport answering from a table keyed by URL without query.
    ///
    /// Unscripted URLs behave like an unreachable host.
    #[derive(Debug, Default)]
    pub struct ScriptedTransport {
        responses: Mutex<HashMap<String, ScriptedResponse>>,
        requests: Mutex<Vec<RecordedRequest>>,
    }

    impl ScriptedTransport {
        /// Creates a transport with no scripted replies.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Scripts a JSON reply for a URL.
        #[must_use]
        pub fn with_json(self, url: &str, body: serde_json::Value) -> Self {
            self.respond(url, ScriptedResponse::Json(body));
            self
        }

        /// Scripts a reply for a URL, replacing any previous one.
        pub fn respond(&self, url: &str, response: ScriptedResponse) {
            self.responses
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(url.to_string(), response);
        }

        /// All requests seen so far.
        #[must_use]
        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Requests whose URL starts with `prefix`.
        #[must_use]
        pub fn requests_to(&self, prefix: &str) -> Vec<RecordedRequest> {
            self.requests()
                .into_iter()
                .filter(|r| r.url.starts_with(prefix))
                .collect()
        }

        fn reply(&self, request: RecordedRequest, url: &Url) -> Result<JsonObject, TransportError> {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request);

            let mut key = url.clone();
            key.set_query(None);
            let endpoint = endpoint_host(url);
            let response = self
                .responses
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(key.as_str())
                .cloned();

            match response {
                Some(ScriptedResponse::Json(serde_json::Value::Object(map))) => Ok(map),
                Some(ScriptedResponse::Json(_) | ScriptedResponse::NotJson) => {
                    Err(TransportError::InvalidBody {
                        endpoint,
                        status: 200,
                    })
                }
                Some(ScriptedResponse::Timeout) => Err(TransportError::Timeout { endpoint }),
                None => Err(TransportError::Request {
                    endpoint,
                    message: "connection failed".to_string(),
                }),
            }
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn get_json(
            &self,
            url: &Url,
            bearer: Option<&str>,
        ) -> Result<JsonObject, TransportError> {
            let request = RecordedRequest {
                method: "GET",
                url: url.to_string(),
                bearer: bearer.map(str::to_string),
                form: Vec::new(),
            };
            self.reply(request, url)
        }

        async fn post_form(
            &self,
            url: &Url,
            form: &[(&str, &str)],
        ) -> Result<JsonObject, TransportError> {
            let request = RecordedRequest {
                method: "POST",
                url: url.to_string(),
                bearer: None,
                form: form
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            };
            self.reply(request, url)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_host_strips_path_and_query() {
        let url = Url::parse("https://idp.example.com/oauth2/v1/token?secret=x").unwrap();
        assert_eq!(endpoint_host(&url), "idp.example.com");
    }

    #[tokio::test]
    async fn test_scripted_transport_records_and_replies() {
        let transport = ScriptedTransport::new()
            .with_json("https://idp.example.com/userinfo", json!({"email": "a@b.com"}));
        let url = Url::parse("https://idp.example.com/userinfo").unwrap();

        let body = transport.get_json(&url, Some("T")).await.unwrap();
        assert_eq!(body["email"], "a@b.com");

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].bearer.as_deref(), Some("T"));
    }

    #[tokio::test]
    async fn test_scripted_transport_failures() {
        let transport = ScriptedTransport::new();
        transport.respond("https://idp.example.com/slow", ScriptedResponse::Timeout);
        transport.respond("https://idp.example.com/html", ScriptedResponse::NotJson);

        let slow = Url::parse("https://idp.example.com/slow").unwrap();
        assert!(matches!(
            transport.get_json(&slow, None).await,
            Err(TransportError::Timeout { .. })
        ));

        let html = Url::parse("https://idp.example.com/html").unwrap();
        assert!(matches!(
            transport.post_form(&html, &[("a", "b")]).await,
            Err(TransportError::InvalidBody { .. })
        ));

        let unknown = Url::parse("https://other.example.com/").unwrap();
        assert!(matches!(
            transport.get_json(&unknown, None).await,
            Err(TransportError::Request { .. })
        ));
    }

    #[test]
    fn test_reqwest_transport_builds() {
        assert!(ReqwestTransport::new(Duration::from_secs(5)).is_ok());
    }
}
