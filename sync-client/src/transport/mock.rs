//! Mock transport for testing.
//!
//! Allows scripting responses and capturing sent requests for verification.

use super::{HttpResponse, HttpTransport, OutboundRequest, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Status returned when nothing is queued.
const DEFAULT_STATUS: u16 = 202;

/// Mock transport for testing.
///
/// Scripted outcomes are consumed in order; once the queue is empty every
/// request gets the default status (202 unless changed).
#[derive(Debug)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug)]
struct MockTransportInner {
    sent_requests: Vec<OutboundRequest>,
    responses: VecDeque<Result<HttpResponse, TransportError>>,
    default_status: u16,
}

impl Default for MockTransportInner {
    fn default() -> Self {
        Self {
            sent_requests: Vec::new(),
            responses: VecDeque::new(),
            default_status: DEFAULT_STATUS,
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockTransportInner::default())),
        }
    }
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next unscripted request.
    pub fn queue_status(&self, status: u16, body: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.responses.push_back(Ok(HttpResponse {
            status,
            body: body.to_string(),
        }));
    }

    /// Queue the same status `count` times.
    pub fn queue_statuses(&self, status: u16, body: &str, count: usize) {
        for _ in 0..count {
            self.queue_status(status, body);
        }
    }

    /// Cause the next request to fail at the transport level.
    pub fn fail_next(&self, error: TransportError) {
        let mut inner = self.inner.lock().unwrap();
        inner.responses.push_back(Err(error));
    }

    /// Change the status returned once the queue is drained.
    pub fn set_default_status(&self, status: u16) {
        let mut inner = self.inner.lock().unwrap();
        inner.default_status = status;
    }

    /// Get all requests that were sent.
    pub fn sent_requests(&self) -> Vec<OutboundRequest> {
        let inner = self.inner.lock().unwrap();
        inner.sent_requests.clone()
    }

    /// Get the last request that was sent.
    pub fn last_sent(&self) -> Option<OutboundRequest> {
        let inner = self.inner.lock().unwrap();
        inner.sent_requests.last().cloned()
    }

    /// Number of requests sent so far.
    pub fn sent_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.sent_requests.len()
    }

    /// Clear all state (requests, queue, default status).
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = MockTransportInner::default();
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn post_json(&self, request: OutboundRequest) -> Result<HttpResponse, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.sent_requests.push(request);

        match inner.responses.pop_front() {
            Some(scripted) => scripted,
            None => Ok(HttpResponse {
                status: inner.default_status,
                body: String::new(),
            }),
        }
    }
}
