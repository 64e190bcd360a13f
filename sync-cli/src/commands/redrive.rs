//! Manual re-drive of failed jobs.

use anyhow::Result;
use sync_server::storage::{SqliteStorage, SyncJobStore};

/// Run the redrive command.
///
/// Only jobs below `max_retries` are moved; exhausted jobs need `reset-job`.
pub async fn run(storage: &SqliteStorage, max_retries: u32) -> Result<()> {
    let ids = storage.redrive_failed(max_retries).await?;

    if ids.is_empty() {
        println!("No failed jobs eligible for re-drive.");
        return Ok(());
    }

    for id in &ids {
        println!("Re-driven: {}", id);
    }
    println!();
    println!("{} job(s) moved back to pending.", ids.len());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn redrive_on_empty_database() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        assert!(run(&storage, 3).await.is_ok());
    }
}
