//! Talent pool management.

use crate::error::{ServiceError, ServiceResult};
use crate::server::SyncService;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use sync_types::{ProfileRecord, SubjectId, TalentPool, TalentPoolId};

/// Body of `POST /api/talent-pools`.
#[derive(Debug, Deserialize)]
pub struct CreatePool {
    /// Business identifier.
    #[serde(alias = "talentPoolId")]
    pub talent_pool_id: TalentPoolId,
    /// Display name.
    #[serde(alias = "talentPoolName")]
    pub talent_pool_name: String,
}

/// A pool with its member count.
#[derive(Debug, Serialize)]
pub struct PoolDetail {
    /// The pool itself.
    #[serde(flatten)]
    pub pool: TalentPool,
    /// Number of member snapshots.
    pub members: usize,
}

pub async fn list_pools(
    Extension(service): Extension<Arc<SyncService>>,
) -> ServiceResult<Json<Vec<TalentPool>>> {
    Ok(Json(service.storage().list_pools().await?))
}

pub async fn create_pool(
    Extension(service): Extension<Arc<SyncService>>,
    Json(request): Json<CreatePool>,
) -> ServiceResult<(StatusCode, Json<TalentPool>)> {
    let pool = service
        .storage()
        .create_pool(&request.talent_pool_id, &request.talent_pool_name)
        .await?;
    tracing::info!(pool = %pool.talent_pool_id, "Talent pool created");
    Ok((StatusCode::CREATED, Json(pool)))
}

pub async fn get_pool(
    Extension(service): Extension<Arc<SyncService>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<PoolDetail>> {
    let id = TalentPoolId::new(id);
    let pool = service
        .storage()
        .get_pool(&id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Talent pool {} not found", id)))?;
    let members = service.directory().members(&id).await?.len();
    Ok(Json(PoolDetail { pool, members }))
}

pub async fn upsert_member(
    Extension(service): Extension<Arc<SyncService>>,
    Path(id): Path<String>,
    Json(record): Json<ProfileRecord>,
) -> ServiceResult<StatusCode> {
    let id = TalentPoolId::new(id);
    service.storage().upsert_member(&id, &record).await?;
    tracing::debug!(pool = %id, cv_id = %record.cv_id, "Member snapshot stored");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_member(
    Extension(service): Extension<Arc<SyncService>>,
    Path((id, cv_id)): Path<(String, String)>,
) -> ServiceResult<StatusCode> {
    let id = TalentPoolId::new(id);
    let cv_id = SubjectId::new(cv_id);
    if service.storage().remove_member(&id, &cv_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ServiceError::NotFound(format!(
            "{} is not a member of talent pool {}",
            cv_id, id
        )))
    }
}
