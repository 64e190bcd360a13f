//! # talent-sync-server
//!
//! Propagates job-seeker profile changes from the talent pool side to an
//! external matching partner and to a peer service.
//!
//! This crate implements a service that:
//! - Records every profile mutation in a durable change log
//! - Delivers the newest change per profile to the matching partner, with a
//!   deterministic idempotency key and bounded retries
//! - Periodically aggregates all talent pools into one bulk sync job and
//!   ships it to the peer service
//! - Re-drives work that has not converged, without ever blocking a worker
//!   on a retry delay
//!
//! ## Architecture
//!
//! ```text
//!  profile store ──► HTTP ──┐                   ┌──► matching partner
//!                           │                   │     (per change)
//!        ┌──────────────────┴───────────────────┴──┐
//!        │  SyncService                            │
//!        │  ┌────────────┐  ┌───────────────────┐  │
//!        │  │ scheduler  │─►│ dispatcher/workers│  │
//!        │  └────────────┘  └───────────────────┘  │
//!        │  ┌────────────────────────────────────┐ │
//!        │  │ SQLite (change log, jobs, pools)   │ │
//!        │  └────────────────────────────────────┘ │
//!        └─────────────────────────────────────┬───┘
//!                                              └──► peer service (bulk)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod scheduler;
pub mod server;
pub mod storage;
