//! Storage layer for talent-sync.
//!
//! Three seams: the append-only change log, the sync job store and the
//! profile directory the aggregator reads pool members from. All timestamps
//! are unix milliseconds.

mod sqlite;

pub use sqlite::SqliteStorage;

use crate::error::StorageError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use sync_core::SyncJobStatus;
use sync_types::{ChangeLogEntryId, Operation, ProfileRecord, SubjectId, SyncJobId, TalentPoolId};

/// A recorded profile mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeLogEntry {
    /// Storage-assigned id.
    pub id: ChangeLogEntryId,
    /// Profile the change applies to.
    pub subject_id: SubjectId,
    /// Mutation tag.
    pub operation: Operation,
    /// When the change was recorded.
    pub timestamp: i64,
    /// Whether the partner confirmed delivery.
    pub synced: bool,
    /// Snapshot captured with the change, if any.
    pub payload: Option<Value>,
    /// Exhausted delivery rounds so far.
    pub delivery_rounds: u32,
    /// Failure detail of the last exhausted round.
    pub last_error: Option<String>,
    /// Holder of the current lease.
    pub leased_by: Option<String>,
    /// Lease expiry.
    pub leased_until: Option<i64>,
    /// Nothing could be sent for this entry; re-drive ignores it.
    pub skipped: bool,
}

impl ChangeLogEntry {
    /// Whether `holder` owns an unexpired lease at `now`.
    pub fn is_leased_by(&self, holder: &str, now: i64) -> bool {
        self.leased_by.as_deref() == Some(holder) && self.leased_until.map_or(false, |t| t >= now)
    }
}

/// A (subject, operation) pair whose newest change has not been delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsyncedHead {
    /// Profile id.
    pub subject_id: SubjectId,
    /// Mutation tag.
    pub operation: Operation,
}

/// A queued bulk delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncJob {
    /// Job id.
    pub id: SyncJobId,
    /// Bulk payload (`{profiles: [...]}`).
    pub payload: Value,
    /// Fingerprint of the payload.
    pub payload_digest: String,
    /// Current status.
    #[serde(serialize_with = "serialize_status")]
    pub status: SyncJobStatus,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Last failure detail.
    pub error_message: Option<String>,
    /// Creation time.
    pub created_at: i64,
    /// Last mutation time.
    pub updated_at: i64,
    /// Earliest time the next attempt may run.
    pub next_attempt_at: i64,
}

fn serialize_status<S: serde::Serializer>(status: &SyncJobStatus, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(status.as_str())
}

/// Result of one delivery attempt, as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    /// New status.
    pub status: SyncJobStatus,
    /// New retry count.
    pub retry_count: u32,
    /// Failure detail, if the attempt failed.
    pub error_message: Option<String>,
    /// When a scheduled retry becomes due.
    pub next_attempt_at: i64,
}

/// Job totals per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    /// Jobs waiting for delivery.
    pub pending: u64,
    /// Delivered jobs.
    pub success: u64,
    /// Jobs at rest in `failed`.
    pub failed: u64,
}

/// Append-only record of profile mutations.
#[async_trait]
pub trait ChangeLog: Send + Sync {
    /// Append an unsynced entry.
    async fn record(
        &self,
        subject: &SubjectId,
        operation: Operation,
        payload: Option<&Value>,
    ) -> Result<ChangeLogEntryId, StorageError>;

    /// Most recent unsynced entry for the pair, newest timestamp first.
    async fn find_latest_unsynced(
        &self,
        subject: &SubjectId,
        operation: Operation,
    ) -> Result<Option<ChangeLogEntry>, StorageError>;

    /// Atomically lease the most recent unsynced entry for the pair.
    ///
    /// Returns `None` when there is nothing unsynced or the newest entry is
    /// leased by someone else.
    async fn claim_latest_unsynced(
        &self,
        subject: &SubjectId,
        operation: Operation,
        holder: &str,
        lease: Duration,
    ) -> Result<Option<ChangeLogEntry>, StorageError>;

    /// Extend a lease. Only the holder can renew; returns whether it did.
    async fn renew_lease(
        &self,
        id: ChangeLogEntryId,
        holder: &str,
        lease: Duration,
    ) -> Result<bool, StorageError>;

    /// Flag an entry as delivered and drop its lease. Idempotent.
    async fn mark_synced(&self, id: ChangeLogEntryId) -> Result<(), StorageError>;

    /// Drop a lease held by `holder`.
    ///
    /// With `Some(error)` the release closes an exhausted delivery round:
    /// the round counter is bumped and the error kept.
    async fn release(
        &self,
        id: ChangeLogEntryId,
        holder: &str,
        error: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Close an entry that has nothing to deliver.
    ///
    /// Skipped entries are never claimed or re-driven until
    /// [`ChangeLog::reset_rounds`] clears the flag. Returns whether the
    /// holder's lease was still in place.
    async fn skip(
        &self,
        id: ChangeLogEntryId,
        holder: &str,
        reason: &str,
    ) -> Result<bool, StorageError>;

    /// Fetch one entry.
    async fn get_entry(&self, id: ChangeLogEntryId) -> Result<Option<ChangeLogEntry>, StorageError>;

    /// Pairs whose newest entry is unsynced, not skipped, unleased, recorded
    /// at or before `cutoff` and below `max_rounds` exhausted rounds.
    async fn unsynced_heads(
        &self,
        cutoff: i64,
        max_rounds: u32,
    ) -> Result<Vec<UnsyncedHead>, StorageError>;

    /// Number of pairs whose newest entry is unsynced and not skipped.
    async fn count_unsynced_heads(&self) -> Result<u64, StorageError>;

    /// Clear the round counter and the skip flag so re-drive considers the
    /// entry again.
    async fn reset_rounds(&self, id: ChangeLogEntryId) -> Result<bool, StorageError>;
}

/// Durable queue of bulk deliveries.
#[async_trait]
pub trait SyncJobStore: Send + Sync {
    /// Create a pending job unless a pending job with the same digest exists.
    async fn create_job(&self, payload: &Value, digest: &str) -> Result<Option<SyncJob>, StorageError>;

    /// Fetch one job.
    async fn get_job(&self, id: SyncJobId) -> Result<Option<SyncJob>, StorageError>;

    /// Atomically lease a pending, due, unleased job.
    async fn claim_job(
        &self,
        id: SyncJobId,
        holder: &str,
        lease: Duration,
    ) -> Result<Option<SyncJob>, StorageError>;

    /// Persist the result of an attempt made under `holder`'s lease.
    ///
    /// Returns `false` if the lease was lost in the meantime.
    async fn record_outcome(
        &self,
        id: SyncJobId,
        holder: &str,
        outcome: &JobOutcome,
    ) -> Result<bool, StorageError>;

    /// Flip eligible failed jobs back to pending; `retry_count` is untouched.
    async fn redrive_failed(&self, max_retries: u32) -> Result<Vec<SyncJobId>, StorageError>;

    /// Pending, unleased jobs whose next attempt is due.
    async fn stalled_pending(&self, now: i64) -> Result<Vec<SyncJobId>, StorageError>;

    /// Operator reset of a failed job: pending, zero retries, error cleared.
    async fn reset_job(&self, id: SyncJobId) -> Result<bool, StorageError>;

    /// Jobs newest first, optionally filtered by status.
    async fn list_jobs(
        &self,
        status: Option<SyncJobStatus>,
        limit: u32,
    ) -> Result<Vec<SyncJob>, StorageError>;

    /// Totals per status.
    async fn job_counts(&self) -> Result<JobCounts, StorageError>;
}

/// Source of current member snapshots for a talent pool.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// Member profiles of a pool in membership order.
    async fn members(&self, pool: &TalentPoolId) -> Result<Vec<ProfileRecord>, StorageError>;
}

/// Current time in unix milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A duration in whole milliseconds, saturating.
pub(crate) fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
