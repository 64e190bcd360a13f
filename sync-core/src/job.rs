//! Bulk sync job state machine.
//!
//! ```text
//!            success
//! pending ─────────────► success (terminal, retry_count frozen)
//!    │
//!    │ failure, retry_count+1 < max
//!    ├──────────────────► pending (re-attempt after backoff)
//!    │
//!    │ failure, retry_count+1 >= max
//!    └──────────────────► failed
//!
//! failed ──(re-drive, only while retry_count < max)──► pending
//! ```
//!
//! Like the rest of this crate the machine is pure: the caller persists the
//! returned [`JobState`] and executes the returned [`JobAction`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::retry::{DeliveryOutcome, RetryPolicy};

/// Persistent status of a sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncJobStatus {
    /// Waiting for (another) delivery attempt.
    Pending,
    /// Delivered; no further action.
    Success,
    /// Retry ceiling reached on the last attempt.
    Failed,
}

impl SyncJobStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncJobStatus::Pending => "pending",
            SyncJobStatus::Success => "success",
            SyncJobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncJobStatus::Pending),
            "success" => Ok(SyncJobStatus::Success),
            "failed" => Ok(SyncJobStatus::Failed),
            other => Err(format!("unknown sync job status '{}'", other)),
        }
    }
}

/// The mutable part of a sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobState {
    /// Current status.
    pub status: SyncJobStatus,
    /// Failed delivery attempts so far.
    pub retry_count: u32,
}

/// What the caller must do after applying an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobAction {
    /// Job delivered; nothing else to do.
    Complete,
    /// The job was already delivered; the outcome was ignored.
    AlreadyComplete,
    /// Schedule another attempt after the delay.
    RetryAfter(Duration),
    /// Ceiling reached; leave the job failed for operators and re-drive.
    GiveUp,
}

impl JobState {
    /// State of a freshly created job.
    pub fn new() -> Self {
        Self {
            status: SyncJobStatus::Pending,
            retry_count: 0,
        }
    }

    /// Apply the outcome of one delivery attempt.
    pub fn on_delivery(self, outcome: &DeliveryOutcome, policy: &RetryPolicy) -> (Self, JobAction) {
        if self.status == SyncJobStatus::Success {
            return (self, JobAction::AlreadyComplete);
        }

        match outcome {
            DeliveryOutcome::Delivered => (
                Self {
                    status: SyncJobStatus::Success,
                    retry_count: self.retry_count,
                },
                JobAction::Complete,
            ),
            DeliveryOutcome::Failed(_) => {
                let retry_count = self.retry_count.saturating_add(1);
                if policy.is_exhausted(retry_count) {
                    (
                        Self {
                            status: SyncJobStatus::Failed,
                            retry_count,
                        },
                        JobAction::GiveUp,
                    )
                } else {
                    (
                        Self {
                            status: SyncJobStatus::Pending,
                            retry_count,
                        },
                        JobAction::RetryAfter(policy.delay_for(retry_count)),
                    )
                }
            }
        }
    }
}

impl Default for JobState {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the periodic re-drive may move a job back to pending.
///
/// Only failed jobs below the retry ceiling qualify. Jobs at the ceiling are
/// left alone until an operator resets them explicitly.
pub fn is_redrivable(status: SyncJobStatus, retry_count: u32, max_retries: u32) -> bool {
    status == SyncJobStatus::Failed && retry_count < max_retries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure() -> DeliveryOutcome {
        DeliveryOutcome::Failed("API returned status code 500: boom".into())
    }

    #[test]
    fn new_job_is_pending_with_zero_retries() {
        let state = JobState::new();
        assert_eq!(state.status, SyncJobStatus::Pending);
        assert_eq!(state.retry_count, 0);
    }

    #[test]
    fn success_is_terminal() {
        let policy = RetryPolicy::bulk_default();
        let (state, action) = JobState::new().on_delivery(&DeliveryOutcome::Delivered, &policy);
        assert_eq!(state.status, SyncJobStatus::Success);
        assert_eq!(action, JobAction::Complete);
    }

    #[test]
    fn failure_below_ceiling_stays_pending_with_backoff() {
        let policy = RetryPolicy::bulk_default();
        let (state, action) = JobState::new().on_delivery(&failure(), &policy);
        assert_eq!(state.status, SyncJobStatus::Pending);
        assert_eq!(state.retry_count, 1);
        assert_eq!(action, JobAction::RetryAfter(Duration::from_secs(60)));

        let (state, action) = state.on_delivery(&failure(), &policy);
        assert_eq!(state.retry_count, 2);
        assert_eq!(action, JobAction::RetryAfter(Duration::from_secs(120)));
    }

    #[test]
    fn third_failure_marks_failed() {
        let policy = RetryPolicy::bulk_default();
        let (state, _) = JobState::new().on_delivery(&failure(), &policy);
        let (state, _) = state.on_delivery(&failure(), &policy);
        let (state, action) = state.on_delivery(&failure(), &policy);
        assert_eq!(state.status, SyncJobStatus::Failed);
        assert_eq!(state.retry_count, 3);
        assert_eq!(action, JobAction::GiveUp);
    }

    #[test]
    fn pending_only_reaches_failed_when_crossing_ceiling() {
        let policy = RetryPolicy::bulk_default();
        let mut state = JobState::new();
        loop {
            let before = state;
            let (next, _) = state.on_delivery(&failure(), &policy);
            if next.status == SyncJobStatus::Failed {
                assert!(before.retry_count < policy.max_attempts);
                assert!(next.retry_count >= policy.max_attempts);
                break;
            }
            state = next;
        }
    }

    #[test]
    fn retry_count_frozen_after_success() {
        let policy = RetryPolicy::bulk_default();
        let (state, _) = JobState::new().on_delivery(&failure(), &policy);
        let (state, _) = state.on_delivery(&DeliveryOutcome::Delivered, &policy);
        assert_eq!(state.retry_count, 1);

        let (again, action) = state.on_delivery(&failure(), &policy);
        assert_eq!(again, state);
        assert_eq!(action, JobAction::AlreadyComplete);
    }

    #[test]
    fn retry_count_never_decreases() {
        let policy = RetryPolicy::bulk_default();
        let outcomes = [failure(), failure(), DeliveryOutcome::Delivered, failure()];
        let mut state = JobState::new();
        for outcome in &outcomes {
            let (next, _) = state.on_delivery(outcome, &policy);
            assert!(next.retry_count >= state.retry_count);
            state = next;
        }
    }

    #[test]
    fn redrive_eligibility() {
        assert!(is_redrivable(SyncJobStatus::Failed, 2, 3));
        assert!(!is_redrivable(SyncJobStatus::Failed, 3, 3));
        assert!(!is_redrivable(SyncJobStatus::Pending, 0, 3));
        assert!(!is_redrivable(SyncJobStatus::Success, 0, 3));
    }

    #[test]
    fn status_round_trips_through_storage_strings() {
        for status in [SyncJobStatus::Pending, SyncJobStatus::Success, SyncJobStatus::Failed] {
            assert_eq!(status.as_str().parse::<SyncJobStatus>().unwrap(), status);
        }
        assert!("done".parse::<SyncJobStatus>().is_err());
    }
}
