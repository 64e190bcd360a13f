//! Periodic triggers.
//!
//! Two independent interval loops:
//!
//! - **Primary sync**: aggregate every talent pool into one bulk payload and
//!   queue it as a sync job.
//! - **Re-drive**: move eligible failed jobs back to pending, resume pending
//!   jobs whose scheduled retry was lost, and resend unsynced changes.
//!
//! Both passes are also callable on demand.

use crate::config::SchedulerConfig;
use crate::delivery::DeliveryTask;
use crate::error::StorageError;
use crate::server::SyncService;
use crate::storage::{now_millis, ChangeLog, SyncJobStore};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use sync_core::{aggregate, payload_digest, PoolSnapshot};
use sync_types::SyncJobId;
use tokio::time::interval;

/// Result of a primary sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Talent pools visited.
    pub pools: usize,
    /// Profiles in the aggregated payload.
    pub profiles: usize,
    /// Job created for the payload.
    pub job_id: Option<SyncJobId>,
    /// The same snapshot is already waiting in a pending job.
    pub duplicate: bool,
}

/// Result of a re-drive pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RedriveReport {
    /// Failed jobs moved back to pending.
    pub jobs_redriven: usize,
    /// Pending jobs whose retry was due but not queued.
    pub jobs_resumed: usize,
    /// Unsynced changes queued again.
    pub changes_redriven: usize,
}

/// Aggregate all talent pools and queue the result as a sync job.
pub async fn primary_sync_pass(service: &SyncService) -> Result<SyncReport, StorageError> {
    let pools = service.storage().list_pools().await?;
    if pools.is_empty() {
        tracing::info!("No talent pools found to sync");
        return Ok(SyncReport::default());
    }

    let mut snapshots = Vec::with_capacity(pools.len());
    for pool in pools {
        let members = service.directory().members(&pool.talent_pool_id).await?;
        snapshots.push(PoolSnapshot { pool, members });
    }

    let mut report = SyncReport {
        pools: snapshots.len(),
        ..SyncReport::default()
    };

    let Some(payload) = aggregate(snapshots) else {
        tracing::info!(pools = report.pools, "Talent pools have no members; nothing to sync");
        return Ok(report);
    };
    report.profiles = payload.len();

    let digest = payload_digest(&payload);
    let value = serde_json::to_value(&payload)?;

    match service.storage().create_job(&value, &digest).await? {
        Some(job) => {
            service.metrics().jobs_created.fetch_add(1, Ordering::Relaxed);
            tracing::info!(job = %job.id, "Scheduled sync for {} profiles", report.profiles);
            service
                .dispatcher()
                .dispatch(DeliveryTask::DeliverJob { job_id: job.id });
            report.job_id = Some(job.id);
        }
        None => {
            tracing::info!("Identical snapshot already pending; no new sync job");
            report.duplicate = true;
        }
    }

    Ok(report)
}

/// Re-dispatch work that has not converged.
pub async fn redrive_pass(service: &SyncService) -> Result<RedriveReport, StorageError> {
    let config = service.config();
    let storage = service.storage();
    let dispatcher = service.dispatcher();
    let mut report = RedriveReport::default();

    let redriven = storage.redrive_failed(config.bulk.max_retries).await?;
    for job_id in &redriven {
        tracing::info!(job = %job_id, "Retrying failed sync job");
        dispatcher.dispatch(DeliveryTask::DeliverJob { job_id: *job_id });
    }
    report.jobs_redriven = redriven.len();
    service
        .metrics()
        .jobs_redriven
        .fetch_add(redriven.len() as u64, Ordering::Relaxed);

    let now = now_millis();
    for job_id in storage.stalled_pending(now).await? {
        if redriven.contains(&job_id) {
            continue;
        }
        if dispatcher.dispatch(DeliveryTask::DeliverJob { job_id }) {
            report.jobs_resumed += 1;
        }
    }

    let grace = Duration::from_secs(config.scheduler.redrive_grace_secs);
    let cutoff = now.saturating_sub(i64::try_from(grace.as_millis()).unwrap_or(i64::MAX));
    let heads = storage
        .unsynced_heads(cutoff, config.partner.max_delivery_rounds)
        .await?;
    for head in heads {
        if dispatcher.dispatch(DeliveryTask::DeliverChange {
            subject: head.subject_id,
            operation: head.operation,
        }) {
            report.changes_redriven += 1;
        }
    }
    service
        .metrics()
        .changes_redriven
        .fetch_add(report.changes_redriven as u64, Ordering::Relaxed);

    if report != RedriveReport::default() {
        tracing::info!(
            jobs_redriven = report.jobs_redriven,
            jobs_resumed = report.jobs_resumed,
            changes_redriven = report.changes_redriven,
            "Re-drive pass queued work"
        );
    } else {
        tracing::debug!("Re-drive: nothing to do");
    }

    Ok(report)
}

/// Spawn the primary sync loop.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_sync_task(
    service: Arc<SyncService>,
    config: SchedulerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.sync_enabled {
            tracing::info!("Primary sync task disabled");
            return;
        }

        let interval_secs = config.sync_interval_secs.max(1);
        tracing::info!("Primary sync task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            timer.tick().await;

            if let Err(e) = primary_sync_pass(&service).await {
                tracing::error!("Primary sync error: {}", e);
            }
        }
    })
}

/// Spawn the re-drive loop.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_redrive_task(
    service: Arc<SyncService>,
    config: SchedulerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.redrive_enabled {
            tracing::info!("Re-drive task disabled");
            return;
        }

        let interval_secs = config.redrive_interval_secs.max(1);
        tracing::info!("Re-drive task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            timer.tick().await;

            if let Err(e) = redrive_pass(&service).await {
                tracing::error!("Re-drive error: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::{JobOutcome, SqliteStorage};
    use serde_json::json;
    use sync_client::MockTransport;
    use sync_core::SyncJobStatus;
    use sync_types::{Operation, ProfileRecord, SubjectId, TalentPoolId};

    fn test_config() -> Config {
        let mut config = Config::default();
        config.partner.retry_delay_ms = 10;
        config.bulk.backoff_base_ms = 10;
        config.scheduler.redrive_grace_secs = 0;
        config
    }

    async fn service_with(transport: &MockTransport) -> SyncService {
        let storage = SqliteStorage::in_memory().await.unwrap();
        SyncService::start(test_config(), storage, Arc::new(transport.clone()))
    }

    fn member(cv_id: &str) -> ProfileRecord {
        serde_json::from_value(json!({
            "cvId": cv_id,
            "lastModifiedDt": "2025-01-29T09:49:41.228Z",
            "user": {"userId": "u", "candidateCode": "c"},
            "cvProfile": {"workingHours": 36, "willingToTravel": false},
            "visibleInTalentPool": true
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn primary_pass_without_pools_creates_nothing() {
        let transport = MockTransport::new();
        let service = service_with(&transport).await;

        let report = primary_sync_pass(&service).await.unwrap();
        assert_eq!(report, SyncReport::default());
        assert_eq!(service.storage().job_counts().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn empty_pools_create_no_job() {
        let transport = MockTransport::new();
        let service = service_with(&transport).await;
        service
            .storage()
            .create_pool(&TalentPoolId::new("tp-1"), "Empty")
            .await
            .unwrap();

        let report = primary_sync_pass(&service).await.unwrap();
        assert_eq!(report.pools, 1);
        assert!(report.job_id.is_none());
        assert!(service.storage().list_jobs(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_passes_do_not_duplicate_pending_job() {
        // Keep the job pending by never letting it be delivered successfully.
        let transport = MockTransport::new();
        transport.set_default_status(500);
        let mut config = test_config();
        config.bulk.backoff_base_ms = 60_000;
        let storage = SqliteStorage::in_memory().await.unwrap();
        let service = SyncService::start(config, storage, Arc::new(transport.clone()));

        let pool = TalentPoolId::new("tp-1");
        service.storage().create_pool(&pool, "Data").await.unwrap();
        service.storage().upsert_member(&pool, &member("cv-1")).await.unwrap();

        let (a, b) = tokio::join!(primary_sync_pass(&service), primary_sync_pass(&service));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.job_id.is_some() as u8 + b.job_id.is_some() as u8, 1);
        assert!(a.duplicate || b.duplicate);
        assert_eq!(service.storage().list_jobs(None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn redrive_leaves_jobs_at_ceiling_alone() {
        let transport = MockTransport::new();
        let service = service_with(&transport).await;
        let storage = service.storage();

        let job = storage
            .create_job(&json!({"profiles": []}), "d")
            .await
            .unwrap()
            .unwrap();
        storage.claim_job(job.id, "t", Duration::from_secs(300)).await.unwrap();
        storage
            .record_outcome(
                job.id,
                "t",
                &JobOutcome {
                    status: SyncJobStatus::Failed,
                    retry_count: 3,
                    error_message: Some("down".into()),
                    next_attempt_at: now_millis(),
                },
            )
            .await
            .unwrap();

        let report = redrive_pass(&service).await.unwrap();
        assert_eq!(report.jobs_redriven, 0);
        assert_eq!(
            storage.get_job(job.id).await.unwrap().unwrap().status,
            SyncJobStatus::Failed
        );
        assert_eq!(transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn redrive_resends_unsynced_changes() {
        let transport = MockTransport::new();
        let service = service_with(&transport).await;
        let id = service
            .storage()
            .record(&SubjectId::new("X"), Operation::Delete, None)
            .await
            .unwrap();

        let report = redrive_pass(&service).await.unwrap();
        assert_eq!(report.changes_redriven, 1);

        for _ in 0..200 {
            if service.storage().get_entry(id).await.unwrap().unwrap().synced {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("re-driven change was not delivered");
    }

    #[tokio::test]
    async fn change_without_profile_is_redriven_once() {
        let transport = MockTransport::new();
        let service = service_with(&transport).await;
        let id = service
            .storage()
            .record(&SubjectId::new("ghost"), Operation::Update, None)
            .await
            .unwrap();

        let first = redrive_pass(&service).await.unwrap();
        assert_eq!(first.changes_redriven, 1);

        for _ in 0..200 {
            if service.storage().get_entry(id).await.unwrap().unwrap().skipped {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(service.storage().get_entry(id).await.unwrap().unwrap().skipped);

        let second = redrive_pass(&service).await.unwrap();
        assert_eq!(second.changes_redriven, 0);
        assert_eq!(service.metrics().changes_skipped.load(Ordering::Relaxed), 1);
        assert_eq!(transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn disabled_tasks_exit_immediately() {
        let transport = MockTransport::new();
        let service = Arc::new(service_with(&transport).await);
        let config = SchedulerConfig {
            sync_enabled: false,
            redrive_enabled: false,
            ..SchedulerConfig::default()
        };

        for handle in [
            spawn_sync_task(service.clone(), config.clone()),
            spawn_redrive_task(service.clone(), config.clone()),
        ] {
            tokio::time::timeout(Duration::from_millis(100), handle)
                .await
                .expect("Task should complete when disabled")
                .expect("Task should not panic");
        }
    }
}
