//! Sync job inspection, manual trigger and operator reset.

use crate::error::{ServiceError, ServiceResult};
use crate::scheduler::{primary_sync_pass, SyncReport};
use crate::server::SyncService;
use crate::storage::{SyncJob, SyncJobStore};
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use sync_core::SyncJobStatus;
use sync_types::SyncJobId;

const DEFAULT_LIST_LIMIT: u32 = 100;

/// Query string of `GET /api/sync-jobs`.
#[derive(Debug, Default, Deserialize)]
pub struct JobQuery {
    /// Only jobs in this status.
    pub status: Option<String>,
    /// Maximum number of jobs returned.
    pub limit: Option<u32>,
}

pub async fn trigger_sync(
    Extension(service): Extension<Arc<SyncService>>,
) -> ServiceResult<(StatusCode, Json<SyncReport>)> {
    let report = primary_sync_pass(&service).await?;
    Ok((StatusCode::ACCEPTED, Json(report)))
}

pub async fn list_jobs(
    Extension(service): Extension<Arc<SyncService>>,
    Query(query): Query<JobQuery>,
) -> ServiceResult<Json<Vec<SyncJob>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<SyncJobStatus>)
        .transpose()
        .map_err(ServiceError::BadRequest)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);

    Ok(Json(service.storage().list_jobs(status, limit).await?))
}

pub async fn reset_job(
    Extension(service): Extension<Arc<SyncService>>,
    Path(id): Path<String>,
) -> ServiceResult<(StatusCode, Json<Value>)> {
    let id: SyncJobId = id
        .parse()
        .map_err(|_| ServiceError::NotFound(format!("Sync job {} not found", id)))?;

    let Some(job) = service.storage().get_job(id).await? else {
        return Err(ServiceError::NotFound(format!("Sync job {} not found", id)));
    };

    if !service.reset_job(id).await? {
        return Err(ServiceError::BadRequest(format!(
            "Sync job {} is {}; only failed jobs can be reset",
            id, job.status
        )));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": format!("Sync job {} reset to pending", id) })),
    ))
}
