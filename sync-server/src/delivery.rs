//! Delivery engine.
//!
//! Executes one [`DeliveryTask`] at a time on behalf of a dispatcher worker.
//! Decisions come from the pure machines in `sync-core`; this module only
//! claims work, performs the attempt and persists the result.
//!
//! ```text
//! DeliverChange ─claim─► attempt ─► MarkSynced
//!                           │
//!                           ├─► RetryAfter ─(timer)─► RetryChange ─► attempt ...
//!                           └─► Exhausted (lease released, round recorded)
//!
//! DeliverJob ─claim─► attempt ─► Complete | RetryAfter ─(timer)─► DeliverJob | GiveUp
//! ```
//!
//! Nothing here sleeps: a retry is returned as a [`Followup`] and the
//! dispatcher re-enqueues it once the delay has passed.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use sync_client::{BulkClient, PartnerClient};
use sync_core::{
    ChangeAction, ChangeDelivery, DeliveryOutcome, JobAction, JobState, RetryPolicy, SyncJobStatus,
};
use sync_types::{ChangeLogEntryId, IdempotencyKey, Operation, PartnerRequest, SubjectId, SyncJobId};

use crate::error::StorageError;
use crate::server::ServiceMetrics;
use crate::storage::{
    millis, now_millis, ChangeLog, ChangeLogEntry, JobOutcome, SqliteStorage, SyncJobStore,
};

const PROFILE_NOT_FOUND: &str = "profile not found";

/// A unit of work for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryTask {
    /// Deliver the latest unsynced change for the pair.
    DeliverChange {
        /// Profile id.
        subject: SubjectId,
        /// Mutation tag.
        operation: Operation,
    },
    /// Continue a delivery round of a specific entry.
    RetryChange {
        /// Entry being delivered.
        entry_id: ChangeLogEntryId,
        /// Lease held since the round started.
        lease_token: String,
        /// 1-based attempt to make.
        attempt: u32,
    },
    /// Attempt delivery of a sync job.
    DeliverJob {
        /// Job to deliver.
        job_id: SyncJobId,
    },
}

/// Identity used to suppress duplicate queue entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskKey {
    /// A (subject, operation) pair.
    Change(SubjectId, Operation),
    /// A specific change log entry.
    Entry(ChangeLogEntryId),
    /// A sync job.
    Job(SyncJobId),
}

impl DeliveryTask {
    /// Queue identity of this task.
    pub fn key(&self) -> TaskKey {
        match self {
            DeliveryTask::DeliverChange { subject, operation } => {
                TaskKey::Change(subject.clone(), *operation)
            }
            DeliveryTask::RetryChange { entry_id, .. } => TaskKey::Entry(*entry_id),
            DeliveryTask::DeliverJob { job_id } => TaskKey::Job(*job_id),
        }
    }
}

/// Work to re-enqueue after a delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Followup {
    /// How long to wait.
    pub delay: Duration,
    /// What to run then.
    pub task: DeliveryTask,
}

/// Performs delivery attempts against storage and the outbound clients.
pub struct DeliveryEngine {
    storage: Arc<SqliteStorage>,
    partner: PartnerClient,
    bulk: BulkClient,
    partner_policy: RetryPolicy,
    bulk_policy: RetryPolicy,
    lease: Duration,
    metrics: Arc<ServiceMetrics>,
}

impl std::fmt::Debug for DeliveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryEngine")
            .field("partner", &self.partner)
            .field("bulk", &self.bulk)
            .field("partner_policy", &self.partner_policy)
            .field("bulk_policy", &self.bulk_policy)
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

impl DeliveryEngine {
    /// Create an engine.
    pub fn new(
        storage: Arc<SqliteStorage>,
        partner: PartnerClient,
        bulk: BulkClient,
        partner_policy: RetryPolicy,
        bulk_policy: RetryPolicy,
        lease: Duration,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            storage,
            partner,
            bulk,
            partner_policy,
            bulk_policy,
            lease,
            metrics,
        }
    }

    /// Run one task.
    ///
    /// Returns the follow-up to schedule, if any. Storage errors abort the
    /// task; any lease taken stays until it expires and re-drive picks the
    /// work up again.
    pub async fn run(&self, task: DeliveryTask) -> Result<Option<Followup>, StorageError> {
        match task {
            DeliveryTask::DeliverChange { subject, operation } => {
                self.deliver_change(&subject, operation).await
            }
            DeliveryTask::RetryChange {
                entry_id,
                lease_token,
                attempt,
            } => self.retry_change(entry_id, lease_token, attempt).await,
            DeliveryTask::DeliverJob { job_id } => self.deliver_job(job_id).await,
        }
    }

    async fn deliver_change(
        &self,
        subject: &SubjectId,
        operation: Operation,
    ) -> Result<Option<Followup>, StorageError> {
        let token = new_lease_token();
        let claimed = self
            .storage
            .claim_latest_unsynced(subject, operation, &token, self.lease)
            .await?;

        let Some(entry) = claimed else {
            tracing::debug!(
                cv_id = %subject,
                operation = %operation,
                "No claimable unsynced change"
            );
            return Ok(None);
        };

        self.attempt_change(entry, token, ChangeDelivery::first()).await
    }

    async fn retry_change(
        &self,
        entry_id: ChangeLogEntryId,
        token: String,
        attempt: u32,
    ) -> Result<Option<Followup>, StorageError> {
        let Some(entry) = self.storage.get_entry(entry_id).await? else {
            tracing::warn!(entry = %entry_id, "Change log entry vanished during retry");
            return Ok(None);
        };

        if entry.synced {
            return Ok(None);
        }

        if !entry.is_leased_by(&token, now_millis()) {
            tracing::warn!(entry = %entry_id, "Lease lost before retry; leaving entry to re-drive");
            return Ok(None);
        }

        self.attempt_change(entry, token, ChangeDelivery { attempt }).await
    }

    async fn attempt_change(
        &self,
        entry: ChangeLogEntry,
        token: String,
        delivery: ChangeDelivery,
    ) -> Result<Option<Followup>, StorageError> {
        let Some(request) = self.partner_request(&entry).await? else {
            tracing::warn!(
                cv_id = %entry.subject_id,
                operation = %entry.operation,
                "Profile not found; skipping delivery"
            );
            self.metrics.changes_skipped.fetch_add(1, Ordering::Relaxed);
            self.storage.skip(entry.id, &token, PROFILE_NOT_FOUND).await?;
            return Ok(None);
        };

        let key = IdempotencyKey::new(&entry.subject_id, entry.operation, entry.id);
        let outcome = self.partner.send(&key, &request).await;

        match delivery.on_result(&outcome, &self.partner_policy) {
            ChangeAction::MarkSynced => {
                self.storage.mark_synced(entry.id).await?;
                self.metrics
                    .partner_deliveries_ok
                    .fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    cv_id = %entry.subject_id,
                    key = %key,
                    "Successfully synced profile to matching partner"
                );
                Ok(None)
            }
            ChangeAction::RetryAfter { delay, next } => {
                self.metrics
                    .partner_attempts_failed
                    .fetch_add(1, Ordering::Relaxed);

                // The lease has to outlive the wait plus the next attempt.
                let renewed = self
                    .storage
                    .renew_lease(entry.id, &token, delay + self.lease)
                    .await?;
                if !renewed {
                    tracing::warn!(entry = %entry.id, "Lease lost; abandoning delivery round");
                    return Ok(None);
                }

                Ok(Some(Followup {
                    delay,
                    task: DeliveryTask::RetryChange {
                        entry_id: entry.id,
                        lease_token: token,
                        attempt: next.attempt,
                    },
                }))
            }
            ChangeAction::Exhausted { last_error } => {
                self.metrics
                    .partner_attempts_failed
                    .fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .partner_rounds_exhausted
                    .fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    cv_id = %entry.subject_id,
                    key = %key,
                    "Failed to sync profile after {} attempts: {}",
                    self.partner_policy.max_attempts,
                    last_error
                );
                self.storage
                    .release(entry.id, &token, Some(&last_error))
                    .await?;
                Ok(None)
            }
        }
    }

    /// Build the partner body; `None` when an INSERT/UPDATE has nothing to send.
    async fn partner_request(
        &self,
        entry: &ChangeLogEntry,
    ) -> Result<Option<PartnerRequest>, StorageError> {
        if !entry.operation.carries_profile() {
            return Ok(Some(PartnerRequest::delete(entry.subject_id.clone())));
        }

        let profile = match &entry.payload {
            Some(payload) => Some(payload.clone()),
            None => self
                .storage
                .get_profile(&entry.subject_id)
                .await?
                .map(|record| record.to_value()),
        };

        Ok(profile.map(|profile| {
            PartnerRequest::with_profile(entry.subject_id.clone(), entry.operation, profile)
        }))
    }

    async fn deliver_job(&self, job_id: SyncJobId) -> Result<Option<Followup>, StorageError> {
        let Some(job) = self.storage.get_job(job_id).await? else {
            tracing::error!(job = %job_id, "Sync job not found");
            return Ok(None);
        };

        if job.status == SyncJobStatus::Success {
            tracing::info!(job = %job_id, "Sync job already completed successfully");
            return Ok(None);
        }

        let token = new_lease_token();
        let Some(job) = self.storage.claim_job(job_id, &token, self.lease).await? else {
            tracing::debug!(job = %job_id, "Sync job not claimable (leased, not due or not pending)");
            return Ok(None);
        };

        let outcome = self.bulk.send_value(job.payload.clone()).await;
        let state = JobState {
            status: job.status,
            retry_count: job.retry_count,
        };
        let (next, action) = state.on_delivery(&outcome, &self.bulk_policy);

        let error_message = match &outcome {
            DeliveryOutcome::Delivered => job.error_message.clone(),
            DeliveryOutcome::Failed(detail) => Some(detail.clone()),
        };
        let delay = match &action {
            JobAction::RetryAfter(delay) => *delay,
            _ => Duration::ZERO,
        };
        let persisted = JobOutcome {
            status: next.status,
            retry_count: next.retry_count,
            error_message,
            next_attempt_at: now_millis().saturating_add(millis(delay)),
        };

        if !self.storage.record_outcome(job_id, &token, &persisted).await? {
            tracing::warn!(job = %job_id, "Sync job lease lost; outcome discarded");
            return Ok(None);
        }

        match action {
            JobAction::Complete => {
                self.metrics.bulk_deliveries_ok.fetch_add(1, Ordering::Relaxed);
                tracing::info!(job = %job_id, "Sync job completed successfully");
                Ok(None)
            }
            JobAction::AlreadyComplete => Ok(None),
            JobAction::RetryAfter(delay) => {
                self.metrics
                    .bulk_attempts_failed
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    job = %job_id,
                    retry_count = next.retry_count,
                    "Sync job failed, retrying in {:?}: {}",
                    delay,
                    persisted.error_message.as_deref().unwrap_or_default()
                );
                Ok(Some(Followup {
                    delay,
                    task: DeliveryTask::DeliverJob { job_id },
                }))
            }
            JobAction::GiveUp => {
                self.metrics
                    .bulk_attempts_failed
                    .fetch_add(1, Ordering::Relaxed);
                self.metrics.jobs_failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    job = %job_id,
                    retry_count = next.retry_count,
                    "Sync job failed permanently: {}",
                    persisted.error_message.as_deref().unwrap_or_default()
                );
                Ok(None)
            }
        }
    }
}

fn new_lease_token() -> String {
    uuid::Uuid::new_v4().to_string()
}
