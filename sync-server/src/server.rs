//! Main SyncService coordination.
//!
//! SyncService owns storage, the outbound clients and the dispatcher, and
//! exposes the operations the HTTP surface, the scheduler and the CLI use.

use crate::config::Config;
use crate::delivery::{DeliveryEngine, DeliveryTask};
use crate::dispatcher::Dispatcher;
use crate::error::StorageError;
use crate::storage::{ChangeLog, ProfileDirectory, SqliteStorage, SyncJobStore};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use sync_client::{BulkClient, HttpTransport, PartnerClient};
use sync_types::{ChangeLogEntryId, Operation, ProfileRecord, SubjectId, SyncJobId};
use tokio::task::JoinHandle;

/// Operational metrics for monitoring propagation activity.
///
/// All counters are monotonically increasing (reset only on restart).
/// Thread-safe via `AtomicU64`, no locks needed for incrementing.
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    /// Change log entries recorded.
    pub changes_recorded: AtomicU64,
    /// Changes confirmed by the partner.
    pub partner_deliveries_ok: AtomicU64,
    /// Failed partner attempts (each retry counts).
    pub partner_attempts_failed: AtomicU64,
    /// Delivery rounds that ran out of attempts.
    pub partner_rounds_exhausted: AtomicU64,
    /// Changes skipped because there was nothing to send.
    pub changes_skipped: AtomicU64,
    /// Changes handed to the dispatcher by re-drive.
    pub changes_redriven: AtomicU64,
    /// Sync jobs created.
    pub jobs_created: AtomicU64,
    /// Sync jobs delivered.
    pub bulk_deliveries_ok: AtomicU64,
    /// Failed bulk attempts.
    pub bulk_attempts_failed: AtomicU64,
    /// Sync jobs that reached the retry ceiling.
    pub jobs_failed: AtomicU64,
    /// Failed jobs moved back to pending by re-drive.
    pub jobs_redriven: AtomicU64,
}

/// The propagation service.
pub struct SyncService {
    config: Config,
    storage: Arc<SqliteStorage>,
    directory: Arc<dyn ProfileDirectory>,
    metrics: Arc<ServiceMetrics>,
    dispatcher: Dispatcher,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .field("queued", &self.dispatcher.queued())
            .finish_non_exhaustive()
    }
}

impl SyncService {
    /// Create the service and start its delivery workers.
    ///
    /// Must be called inside a tokio runtime. Pool members are read from
    /// the service's own storage.
    pub fn start(config: Config, storage: SqliteStorage, transport: Arc<dyn HttpTransport>) -> Self {
        let storage = Arc::new(storage);
        let directory: Arc<dyn ProfileDirectory> = storage.clone();
        Self::start_with_directory(config, storage, directory, transport)
    }

    /// Like [`SyncService::start`] with an external profile directory.
    pub fn start_with_directory(
        config: Config,
        storage: Arc<SqliteStorage>,
        directory: Arc<dyn ProfileDirectory>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let metrics = Arc::new(ServiceMetrics::default());

        let partner = PartnerClient::new(transport.clone(), config.partner.url.clone())
            .with_timeout(config.partner.timeout());
        let bulk = BulkClient::new(transport, config.bulk.url.clone())
            .with_timeout(config.bulk.timeout());

        let engine = Arc::new(DeliveryEngine::new(
            storage.clone(),
            partner,
            bulk,
            config.partner.retry_policy(),
            config.bulk.retry_policy(),
            config.dispatcher.lease(),
            metrics.clone(),
        ));
        let (dispatcher, workers) = Dispatcher::spawn(engine, &config.dispatcher);

        Self {
            config,
            storage,
            directory,
            metrics,
            dispatcher,
            workers: Mutex::new(workers),
        }
    }

    /// Get the service configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the storage layer.
    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    /// Profile directory used by the aggregator.
    pub fn directory(&self) -> &dyn ProfileDirectory {
        self.directory.as_ref()
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }

    /// Get the dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Store a batch of profile snapshots and queue each change for delivery.
    ///
    /// Every record is durable before this returns. Returns the number of
    /// records stored.
    pub async fn ingest_bulk(&self, profiles: &[ProfileRecord]) -> Result<usize, StorageError> {
        for record in profiles {
            let (entry, operation) = self.storage.ingest_profile(record).await?;
            self.metrics.changes_recorded.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(cv_id = %record.cv_id, entry = %entry, %operation, "Profile stored");

            self.dispatcher.dispatch(DeliveryTask::DeliverChange {
                subject: record.cv_id.clone(),
                operation,
            });
        }

        Ok(profiles.len())
    }

    /// Record a single change notification and queue its delivery.
    ///
    /// An INSERT or UPDATE whose body is a full profile for the same CV
    /// refreshes the stored snapshot; a DELETE drops it.
    pub async fn notify_change(
        &self,
        subject: &SubjectId,
        operation: Operation,
        profile: Option<&Value>,
    ) -> Result<ChangeLogEntryId, StorageError> {
        let entry = match operation {
            Operation::Delete => {
                let (entry, existed) = self.storage.forget_profile(subject).await?;
                if !existed {
                    tracing::debug!(cv_id = %subject, "DELETE for a profile with no stored snapshot");
                }
                entry
            }
            Operation::Insert | Operation::Update => match profile {
                Some(body) => match snapshot_of(subject, body) {
                    Some(record) => {
                        self.storage
                            .store_profile_change(&record, operation, body)
                            .await?
                    }
                    None => self.storage.record(subject, operation, Some(body)).await?,
                },
                None => self.storage.record(subject, operation, None).await?,
            },
        };
        self.metrics.changes_recorded.fetch_add(1, Ordering::Relaxed);

        self.dispatcher.dispatch(DeliveryTask::DeliverChange {
            subject: subject.clone(),
            operation,
        });

        Ok(entry)
    }

    /// Operator reset of a failed job; the job is dispatched right away.
    ///
    /// Returns `false` when the job is not in `failed`.
    pub async fn reset_job(&self, id: SyncJobId) -> Result<bool, StorageError> {
        if !self.storage.reset_job(id).await? {
            return Ok(false);
        }

        tracing::info!(job = %id, "Sync job reset by operator");
        self.dispatcher.dispatch(DeliveryTask::DeliverJob { job_id: id });
        Ok(true)
    }

    /// Stop the delivery workers.
    ///
    /// Queued tasks are dropped; their work is still durable in storage.
    pub fn shutdown(&self) {
        if let Ok(mut workers) = self.workers.lock() {
            for handle in workers.drain(..) {
                handle.abort();
            }
        }
    }
}

/// Parse a notification body as the snapshot for `subject`.
fn snapshot_of(subject: &SubjectId, body: &Value) -> Option<ProfileRecord> {
    match serde_json::from_value::<ProfileRecord>(body.clone()) {
        Ok(record) if &record.cv_id == subject => Some(record),
        Ok(record) => {
            tracing::warn!(
                cv_id = %subject,
                body_cv_id = %record.cv_id,
                "Notification body names another CV; snapshot left unchanged"
            );
            None
        }
        Err(_) => None,
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
