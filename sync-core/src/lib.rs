//! # sync-core
//!
//! Pure logic for talent-sync (no I/O, instant tests).
//!
//! This crate implements the retry policies, state machines and the
//! aggregation step without any network or disk I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. The delivery engine in `sync-server` persists the
//! returned state and executes the returned action (send, schedule a retry,
//! give up).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregate;
pub mod change;
pub mod job;
pub mod retry;

pub use aggregate::{aggregate, payload_digest, PoolSnapshot};
pub use change::{ChangeAction, ChangeDelivery};
pub use job::{is_redrivable, JobAction, JobState, SyncJobStatus};
pub use retry::{Backoff, DeliveryOutcome, RetryPolicy};
