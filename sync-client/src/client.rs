//! Outbound clients for the matching partner and the peer bulk endpoint.
//!
//! Each send performs exactly one attempt and maps the result to a
//! [`DeliveryOutcome`]. Retry, backoff and persistence are decided by the
//! caller using the pure machines in `sync-core`.
//!
//! ```text
//! delivery task → PartnerClient / BulkClient → HttpTransport → Network
//!      ↓
//! sync-core (ChangeDelivery / JobState)
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sync_core::DeliveryOutcome;
use sync_types::{IdempotencyKey, PartnerRequest};

use crate::transport::{HttpResponse, HttpTransport, OutboundRequest, TransportError};

/// Timeout for a single partner request.
pub const PARTNER_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for a single bulk request.
pub const BULK_TIMEOUT: Duration = Duration::from_secs(30);

/// Header carrying the idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

/// Client for the matching partner's per-change endpoint.
#[derive(Clone)]
pub struct PartnerClient {
    transport: Arc<dyn HttpTransport>,
    url: String,
    timeout: Duration,
}

impl PartnerClient {
    /// Create a client posting to `url`.
    pub fn new(transport: Arc<dyn HttpTransport>, url: impl Into<String>) -> Self {
        Self {
            transport,
            url: url.into(),
            timeout: PARTNER_TIMEOUT,
        }
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Make one delivery attempt.
    ///
    /// The same `key` must be used for every attempt of one logical change.
    pub async fn send(&self, key: &IdempotencyKey, request: &PartnerRequest) -> DeliveryOutcome {
        let body = match serde_json::to_value(request) {
            Ok(body) => body,
            Err(e) => return DeliveryOutcome::Failed(format!("failed to encode request: {}", e)),
        };

        let outbound = OutboundRequest {
            url: self.url.clone(),
            body,
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                (IDEMPOTENCY_HEADER.to_string(), key.as_str().to_string()),
            ],
            timeout: self.timeout,
        };

        tracing::debug!(
            cv_id = %request.cv_id,
            operation = %request.operation,
            key = %key,
            "Sending change to partner"
        );

        let outcome = outcome_of(self.transport.post_json(outbound).await);
        if let DeliveryOutcome::Failed(detail) = &outcome {
            tracing::warn!(key = %key, "Partner delivery attempt failed: {}", detail);
        }
        outcome
    }
}

impl std::fmt::Debug for PartnerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartnerClient")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Client for the peer service's bulk endpoint.
#[derive(Clone)]
pub struct BulkClient {
    transport: Arc<dyn HttpTransport>,
    url: String,
    timeout: Duration,
}

impl BulkClient {
    /// Create a client posting to `url`.
    pub fn new(transport: Arc<dyn HttpTransport>, url: impl Into<String>) -> Self {
        Self {
            transport,
            url: url.into(),
            timeout: BULK_TIMEOUT,
        }
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Make one attempt with an already encoded payload.
    ///
    /// Jobs store their payload as JSON, so the delivery path sends it as is.
    pub async fn send_value(&self, payload: Value) -> DeliveryOutcome {
        let outbound = OutboundRequest {
            url: self.url.clone(),
            body: payload,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            timeout: self.timeout,
        };

        let outcome = outcome_of(self.transport.post_json(outbound).await);
        if let DeliveryOutcome::Failed(detail) = &outcome {
            tracing::warn!(url = %self.url, "Bulk delivery attempt failed: {}", detail);
        }
        outcome
    }
}

impl std::fmt::Debug for BulkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkClient")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn outcome_of(result: Result<HttpResponse, TransportError>) -> DeliveryOutcome {
    match result {
        Ok(response) if response.is_success() => DeliveryOutcome::Delivered,
        Ok(response) => DeliveryOutcome::Failed(format!(
            "API returned status code {}: {}",
            response.status, response.body
        )),
        Err(e) => DeliveryOutcome::Failed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use serde_json::json;
    use sync_types::{ChangeLogEntryId, Operation, SubjectId};

    fn partner(transport: &MockTransport) -> PartnerClient {
        PartnerClient::new(Arc::new(transport.clone()), "http://partner/hook")
    }

    fn key() -> IdempotencyKey {
        IdempotencyKey::new(&SubjectId::new("X"), Operation::Delete, ChangeLogEntryId::new(9))
    }

    // ===========================================
    // PartnerClient Tests
    // ===========================================

    #[tokio::test]
    async fn partner_delete_body_and_headers() {
        let transport = MockTransport::new();
        let client = partner(&transport);

        let outcome = client
            .send(&key(), &PartnerRequest::delete(SubjectId::new("X")))
            .await;
        assert!(outcome.is_delivered());

        let sent = transport.last_sent().unwrap();
        assert_eq!(sent.url, "http://partner/hook");
        assert_eq!(sent.body, json!({"cvId": "X", "operation": "DELETE"}));
        assert_eq!(sent.header("X-Idempotency-Key"), Some("X_DELETE_9"));
        assert_eq!(sent.header("Content-Type"), Some("application/json"));
        assert_eq!(sent.timeout, PARTNER_TIMEOUT);
    }

    #[tokio::test]
    async fn partner_non_2xx_is_failure_with_detail() {
        let transport = MockTransport::new();
        transport.queue_status(500, "boom");
        let client = partner(&transport);

        let outcome = client
            .send(&key(), &PartnerRequest::delete(SubjectId::new("X")))
            .await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Failed("API returned status code 500: boom".into())
        );
    }

    #[tokio::test]
    async fn partner_transport_error_is_failure() {
        let transport = MockTransport::new();
        transport.fail_next(TransportError::Timeout);
        let client = partner(&transport);

        let outcome = client
            .send(&key(), &PartnerRequest::delete(SubjectId::new("X")))
            .await;
        assert_eq!(outcome, DeliveryOutcome::Failed("request timed out".into()));
    }

    #[tokio::test]
    async fn partner_any_2xx_counts() {
        let transport = MockTransport::new();
        transport.queue_status(200, "");
        transport.queue_status(204, "");
        let client = partner(&transport);
        let request = PartnerRequest::with_profile(SubjectId::new("X"), Operation::Update, json!({}));

        assert!(client.send(&key(), &request).await.is_delivered());
        assert!(client.send(&key(), &request).await.is_delivered());
    }

    // ===========================================
    // BulkClient Tests
    // ===========================================

    #[tokio::test]
    async fn bulk_posts_payload_without_idempotency_header() {
        let transport = MockTransport::new();
        let client = BulkClient::new(Arc::new(transport.clone()), "http://peer/bulk");

        let outcome = client.send_value(json!({"profiles": []})).await;
        assert!(outcome.is_delivered());

        let sent = transport.last_sent().unwrap();
        assert_eq!(sent.body, json!({"profiles": []}));
        assert_eq!(sent.header(IDEMPOTENCY_HEADER), None);
        assert_eq!(sent.timeout, BULK_TIMEOUT);
    }

    #[tokio::test]
    async fn bulk_failure_detail() {
        let transport = MockTransport::new();
        transport.queue_status(503, "unavailable");
        let client = BulkClient::new(Arc::new(transport.clone()), "http://peer/bulk")
            .with_timeout(Duration::from_secs(1));

        let outcome = client.send_value(json!({"profiles": []})).await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Failed("API returned status code 503: unavailable".into())
        );
        assert_eq!(transport.last_sent().unwrap().timeout, Duration::from_secs(1));
    }
}
