//! Transport abstraction for outbound handoff.
//!
//! This module provides a pluggable HTTP layer so the delivery logic can run
//! against the real network (reqwest) or a scripted mock in tests.
//!
//! # Design
//!
//! The transport only performs one POST and reports the status class and
//! body. Retry decisions live in `sync-core`; the transport never retries.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.queue_status(500, "boom");
//! let response = transport.post_json(request).await?;
//! assert!(!response.is_success());
//! ```

mod http;
mod mock;

pub use http::ReqwestTransport;
pub use mock::MockTransport;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Request timed out.
    #[error("request timed out")]
    Timeout,

    /// Any other request failure.
    #[error("request failed: {0}")]
    Request(String),
}

/// A JSON POST to be performed.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    /// Target URL.
    pub url: String,
    /// JSON body.
    pub body: Value,
    /// Extra headers (name, value).
    pub headers: Vec<(String, String)>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl OutboundRequest {
    /// Look up a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Status and body of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body as text (may be empty).
    pub body: String,
}

impl HttpResponse {
    /// Whether the status is in the 2xx class.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport trait for posting JSON to a receiver.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Perform one POST.
    ///
    /// Non-2xx statuses are returned as `Ok`; only transport-level problems
    /// (connect, timeout, I/O) are errors.
    async fn post_json(&self, request: OutboundRequest) -> Result<HttpResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_2xx_only() {
        let ok = |status| HttpResponse {
            status,
            body: String::new(),
        };
        assert!(ok(200).is_success());
        assert!(ok(202).is_success());
        assert!(ok(204).is_success());
        assert!(!ok(199).is_success());
        assert!(!ok(301).is_success());
        assert!(!ok(500).is_success());
    }

    #[test]
    fn header_lookup_ignores_case() {
        let request = OutboundRequest {
            url: "http://partner".into(),
            body: Value::Null,
            headers: vec![("X-Idempotency-Key".into(), "k".into())],
            timeout: Duration::from_secs(1),
        };
        assert_eq!(request.header("x-idempotency-key"), Some("k"));
        assert_eq!(request.header("missing"), None);
    }
}
