//! Explicit operator resets.

use anyhow::{anyhow, bail, Result};
use sync_server::storage::{ChangeLog, SqliteStorage, SyncJobStore};
use sync_types::{ChangeLogEntryId, SyncJobId};

/// Move a failed job back to pending with a zeroed retry count.
pub async fn job(storage: &SqliteStorage, id: &str) -> Result<()> {
    let id: SyncJobId = id.parse().map_err(|e| anyhow!("{}", e))?;

    let Some(current) = storage.get_job(id).await? else {
        bail!("Sync job {} not found", id);
    };

    if !storage.reset_job(id).await? {
        bail!("Sync job {} is {}; only failed jobs can be reset", id, current.status);
    }

    println!("Sync job {} reset to pending.", id);
    Ok(())
}

/// Clear the delivery round counter of an unsynced change.
pub async fn entry(storage: &SqliteStorage, id: u64) -> Result<()> {
    let id = ChangeLogEntryId::new(id);

    if storage.get_entry(id).await?.is_none() {
        bail!("Change log entry {} not found", id);
    }

    if !storage.reset_rounds(id).await? {
        bail!("Change log entry {} is already synced", id);
    }

    println!("Change log entry {} will be delivered again.", id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use sync_core::SyncJobStatus;
    use sync_server::storage::{now_millis, JobOutcome};
    use sync_types::{Operation, SubjectId};

    #[tokio::test]
    async fn reset_job_requires_failed_status() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let created = storage
            .create_job(&json!({"profiles": []}), "d")
            .await
            .unwrap()
            .unwrap();
        let id = created.id.to_string();

        assert!(job(&storage, &id).await.is_err());
        assert!(job(&storage, "not-a-uuid").await.is_err());
        assert!(job(&storage, &SyncJobId::new().to_string()).await.is_err());

        storage
            .claim_job(created.id, "t", Duration::from_secs(60))
            .await
            .unwrap();
        storage
            .record_outcome(
                created.id,
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

        job(&storage, &id).await.unwrap();
        let after = storage.get_job(created.id).await.unwrap().unwrap();
        assert_eq!(after.status, SyncJobStatus::Pending);
        assert_eq!(after.retry_count, 0);
    }

    #[tokio::test]
    async fn reset_entry_rejects_unknown_and_synced_entries() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        assert!(entry(&storage, 99).await.is_err());

        let id = storage
            .record(&SubjectId::new("X"), Operation::Delete, None)
            .await
            .unwrap();
        entry(&storage, id.value()).await.unwrap();

        storage.mark_synced(id).await.unwrap();
        assert!(entry(&storage, id.value()).await.is_err());
    }
}
