//! Health check endpoint.

use crate::error::ServiceResult;
use crate::server::SyncService;
use crate::storage::{ChangeLog, SyncJobStore};
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Global start time for uptime calculation.
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call once at startup).
pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
    /// Sync jobs waiting for delivery.
    pub pending_jobs: u64,
    /// Sync jobs at rest in `failed`.
    pub failed_jobs: u64,
    /// Subject/operation pairs whose newest change is not yet delivered.
    pub unsynced_changes: u64,
}

/// Health check handler.
pub async fn health_handler(
    Extension(service): Extension<Arc<SyncService>>,
) -> ServiceResult<Json<HealthStatus>> {
    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    let jobs = service.storage().job_counts().await?;
    let unsynced = service.storage().count_unsynced_heads().await?;

    Ok(Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        pending_jobs: jobs.pending,
        failed_jobs: jobs.failed,
        unsynced_changes: unsynced,
    }))
}
