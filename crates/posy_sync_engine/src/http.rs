//! HTTP plumbing for the remote sync client.
//!
//! The HTTP client is abstracted via [`HttpClient`] so the Drive remote and
//! the OAuth token exchange can be driven by [`UreqClient`] in production
//! and by [`ScriptedClient`] in tests.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// Largest response body accepted.
pub const MAX_BODY_BYTES: u64 = 256 * 1024 * 1024;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Absolute URL, query string included.
    pub url: String,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// Request body (empty for GET and DELETE).
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Creates a request with no headers and no body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds a bearer token.
    #[must_use]
    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }

    /// Sets the body and its content type.
    #[must_use]
    pub fn body(self, content_type: impl Into<String>, body: Vec<u8>) -> Self {
        let mut request = self.header("Content-Type", content_type);
        request.body = body;
        request
    }

    /// Returns the value of the first header named `name` (case-insensitive).
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A received response. Non-2xx statuses are responses, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Creates a JSON response.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string())
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes the body as JSON.
    pub fn read_json<T: serde::de::DeserializeOwned>(&self) -> SyncResult<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| SyncError::protocol(format!("invalid JSON in response: {e}")))
    }

    /// The body as lossy UTF-8, for error messages.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP client abstraction.
///
/// Implementations only fail for transport problems (DNS, connect, reset,
/// timeout); every status code comes back as an [`HttpResponse`].
pub trait HttpClient: Send + Sync {
    /// Sends a request.
    fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse>;
}

/// [`HttpClient`] backed by a blocking `ureq` agent.
pub struct UreqClient {
    agent: ureq::Agent,
}

impl UreqClient {
    /// Creates a client whose calls give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }
}

impl std::fmt::Debug for UreqClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UreqClient").finish_non_exhaustive()
    }
}

impl HttpClient for UreqClient {
    fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = request;
        tracing::trace!(?method, %url, bytes = body.len(), "http request");

        let result = match method {
            Method::Get | Method::Delete => {
                let mut builder = if method == Method::Get {
                    self.agent.get(&url)
                } else {
                    self.agent.delete(&url)
                };
                for (name, value) in &headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                builder.call()
            }
            Method::Post | Method::Patch => {
                let mut builder = if method == Method::Post {
                    self.agent.post(&url)
                } else {
                    self.agent.patch(&url)
                };
                for (name, value) in &headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                builder.send(&body[..])
            }
        };

        let response = result.map_err(map_ureq_error)?;
        let status = response.status().as_u16();
        let mut body = response.into_body();
        let body = body
            .with_config()
            .limit(MAX_BODY_BYTES)
            .read_to_vec()
            .map_err(map_ureq_error)?;
        tracing::trace!(status, bytes = body.len(), "http response");
        Ok(HttpResponse { status, body })
    }
}

fn map_ureq_error(err: ureq::Error) -> SyncError {
    match err {
        ureq::Error::Timeout(_) => SyncError::Timeout,
        other => SyncError::transient(other.to_string()),
    }
}

/// Percent-encodes a query or form component.
pub fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Encodes `application/x-www-form-urlencoded` pairs.
pub fn form_encode(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// A client that replays queued responses and records every request.
///
/// An empty queue answers like an unreachable network.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    responses: Mutex<VecDeque<SyncResult<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedClient {
    /// Creates a client with nothing queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn push(&self, response: HttpResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    /// Queues a JSON response.
    pub fn push_json(&self, status: u16, value: serde_json::Value) {
        self.push(HttpResponse::json(status, &value));
    }

    /// Queues a transport failure.
    pub fn push_error(&self, error: SyncError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Requests sent so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Number of queued responses not yet consumed.
    pub fn pending(&self) -> usize {
        self.responses.lock().len()
    }
}

impl HttpClient for ScriptedClient {
    fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::transient("no scripted response")))
    }
}

impl<C: HttpClient + ?Sized> HttpClient for std::sync::Arc<C> {
    fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        (**self).send(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn urlencode_reserved_characters() {
        assert_eq!(urlencode("abc-_.~"), "abc-_.~");
        assert_eq!(urlencode("a b&c=d"), "a%20b%26c%3Dd");
        assert_eq!(urlencode("name='x'"), "name%3D%27x%27");
        assert_eq!(
            form_encode(&[("grant_type", "refresh_token"), ("refresh_token", "1//x")]),
            "grant_type=refresh_token&refresh_token=1%2F%2Fx"
        );
    }

    #[test]
    fn request_builder_headers() {
        let request = HttpRequest::new(Method::Post, "https://example.test/upload")
            .bearer("tok")
            .body("application/json", b"{}".to_vec());
        assert_eq!(request.header_value("authorization"), Some("Bearer tok"));
        assert_eq!(request.header_value("content-type"), Some("application/json"));
        assert_eq!(request.body, b"{}");
    }

    #[test]
    fn scripted_client_replays_in_order() {
        let client = ScriptedClient::new();
        client.push_json(200, json!({"ok": true}));
        client.push(HttpResponse::new(503, "down"));

        let first = client
            .send(HttpRequest::new(Method::Get, "https://a"))
            .unwrap();
        assert!(first.is_success());
        let value: serde_json::Value = first.read_json().unwrap();
        assert_eq!(value["ok"], true);

        let second = client
            .send(HttpRequest::new(Method::Get, "https://b"))
            .unwrap();
        assert!(!second.is_success());
        assert_eq!(second.text(), "down");

        assert!(client
            .send(HttpRequest::new(Method::Get, "https://c"))
            .unwrap_err()
            .is_retryable());
        assert_eq!(client.requests().len(), 3);
    }
}
