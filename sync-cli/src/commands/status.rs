//! Show sync status.

use anyhow::Result;
use sync_server::storage::{ChangeLog, SqliteStorage, SyncJobStore};

/// Run the status command.
pub async fn run(storage: &SqliteStorage) -> Result<()> {
    let jobs = storage.job_counts().await?;
    let entries = storage.count_entries().await?;
    let unsynced = storage.count_unsynced_heads().await?;
    let pools = storage.count_pools().await?;
    let profiles = storage.count_profiles().await?;

    println!("=== talent-sync status ===");
    println!();
    println!("Sync jobs:");
    println!("  Pending: {}", jobs.pending);
    println!("  Success: {}", jobs.success);
    println!("  Failed:  {}", jobs.failed);
    println!();
    println!("Change log:");
    println!("  Entries:  {}", entries);
    println!("  Unsynced: {}", unsynced);
    println!();
    println!("Talent pools: {}", pools);
    println!("Profiles:     {}", profiles);

    if jobs.failed > 0 {
        println!();
        println!("Run 'talent-sync jobs --status failed' to inspect failed jobs.");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn status_on_empty_database() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorage::new(&dir.path().join("sync.db")).await.unwrap();

        let result = run(&storage).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn status_with_jobs() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        storage
            .create_job(&json!({"profiles": []}), "digest")
            .await
            .unwrap();

        let result = run(&storage).await;
        assert!(result.is_ok());
    }
}
