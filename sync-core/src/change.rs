//! Single-change delivery state machine.
//!
//! One delivery round of a change log entry makes up to
//! `policy.max_attempts` attempts under the same idempotency key. The entry
//! is marked synced only after a successful response for that key.

use std::time::Duration;

use crate::retry::{DeliveryOutcome, RetryPolicy};

/// Progress of one delivery round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeDelivery {
    /// 1-based number of the attempt being made.
    pub attempt: u32,
}

/// What the caller must do after an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeAction {
    /// Flip the entry's synced flag.
    MarkSynced,
    /// Try again after `delay` with the returned progress.
    RetryAfter {
        /// Delay before the next attempt.
        delay: Duration,
        /// Progress to resume with.
        next: ChangeDelivery,
    },
    /// Round exhausted; leave the entry unsynced for a later re-drive.
    Exhausted {
        /// Detail of the last failure.
        last_error: String,
    },
}

impl ChangeDelivery {
    /// Start of a delivery round.
    pub fn first() -> Self {
        Self { attempt: 1 }
    }

    /// Apply the outcome of the current attempt.
    pub fn on_result(self, outcome: &DeliveryOutcome, policy: &RetryPolicy) -> ChangeAction {
        match outcome {
            DeliveryOutcome::Delivered => ChangeAction::MarkSynced,
            DeliveryOutcome::Failed(detail) if policy.is_exhausted(self.attempt) => {
                ChangeAction::Exhausted {
                    last_error: detail.clone(),
                }
            }
            DeliveryOutcome::Failed(_) => ChangeAction::RetryAfter {
                delay: policy.delay_for(self.attempt),
                next: Self {
                    attempt: self.attempt.saturating_add(1),
                },
            },
        }
    }
}

impl Default for ChangeDelivery {
    fn default() -> Self {
        Self::first()
    }
}
