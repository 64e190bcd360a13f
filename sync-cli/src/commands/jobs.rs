//! List sync jobs.

use anyhow::{anyhow, Result};
use sync_core::{is_redrivable, SyncJobStatus};
use sync_server::storage::{SqliteStorage, SyncJob, SyncJobStore};

/// Run the jobs command.
pub async fn run(
    storage: &SqliteStorage,
    status: Option<&str>,
    limit: u32,
    max_retries: u32,
) -> Result<()> {
    let status = status
        .map(str::parse::<SyncJobStatus>)
        .transpose()
        .map_err(|e| anyhow!(e))?;

    let jobs = storage.list_jobs(status, limit).await?;
    if jobs.is_empty() {
        println!("No sync jobs.");
        return Ok(());
    }

    for job in &jobs {
        println!("{}", format_job(job, max_retries));
    }

    Ok(())
}

fn format_job(job: &SyncJob, max_retries: u32) -> String {
    let profiles = job.payload["profiles"]
        .as_array()
        .map(|p| p.len())
        .unwrap_or(0);

    let mut line = format!(
        "{}  {:<7}  retries={}  profiles={}",
        job.id, job.status, job.retry_count, profiles
    );
    if let Some(error) = &job.error_message {
        line.push_str(&format!("  last_error={:?}", error));
    }
    if job.status == SyncJobStatus::Failed && !is_redrivable(job.status, job.retry_count, max_retries) {
        line.push_str("  (exhausted; use reset-job)");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn rejects_unknown_status() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        assert!(run(&storage, Some("done"), 10, 3).await.is_err());
        assert!(run(&storage, Some("failed"), 10, 3).await.is_ok());
    }

    #[tokio::test]
    async fn formats_job_line() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let job = storage
            .create_job(&json!({"profiles": [{"cvId": "a"}, {"cvId": "b"}]}), "d")
            .await
            .unwrap()
            .unwrap();

        let line = format_job(&job, 3);
        assert!(line.starts_with(&job.id.to_string()));
        assert!(line.contains("pending"));
        assert!(line.contains("profiles=2"));
        assert!(!line.contains("last_error"));
        assert!(!line.contains("exhausted"));
    }
}
