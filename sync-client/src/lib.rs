//! # sync-client
//!
//! Outbound handoff for talent-sync.
//!
//! This crate delivers profile changes to the matching partner and bulk
//! payloads to the peer service. It makes single attempts only; the retry
//! machines live in `sync-core` and the scheduling in `sync-server`.
//!
//! ## Features
//!
//! - **Idempotent partner delivery**: every attempt carries `X-Idempotency-Key`
//! - **Transport Abstraction**: Pluggable HTTP layer (reqwest, mock)
//! - **Uniform outcomes**: 2xx is delivered, anything else is a failure detail
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sync_client::{PartnerClient, ReqwestTransport};
//!
//! let client = PartnerClient::new(Arc::new(ReqwestTransport::new()), "https://partner/hook");
//! let outcome = client.send(&key, &request).await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod transport;

pub use client::{BulkClient, PartnerClient, BULK_TIMEOUT, IDEMPOTENCY_HEADER, PARTNER_TIMEOUT};
pub use transport::{
    HttpResponse, HttpTransport, MockTransport, OutboundRequest, ReqwestTransport, TransportError,
};
