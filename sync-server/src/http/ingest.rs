//! Inbound profile data: bulk snapshots and single change notifications.

use crate::error::ServiceResult;
use crate::server::SyncService;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use sync_types::{Operation, ProfileRecord, SubjectId};

/// Body of `POST /api/bulk`.
#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    /// Profile snapshots to store.
    pub profiles: Vec<ProfileRecord>,
}

/// Body of `POST /api/profiles/changes`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    /// Profile the change applies to.
    pub cv_id: SubjectId,
    /// Mutation tag.
    pub operation: Operation,
    /// Profile body for INSERT/UPDATE.
    #[serde(default)]
    pub profile: Option<Value>,
}

/// Store every record and queue its delivery before answering.
pub async fn bulk_handler(
    Extension(service): Extension<Arc<SyncService>>,
    Json(request): Json<BulkRequest>,
) -> ServiceResult<(StatusCode, Json<Value>)> {
    let stored = service.ingest_bulk(&request.profiles).await?;
    tracing::info!(profiles = stored, "Bulk data received");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Bulk data received and processing started" })),
    ))
}

/// Record one change and queue its delivery.
pub async fn change_handler(
    Extension(service): Extension<Arc<SyncService>>,
    Json(notification): Json<ChangeNotification>,
) -> ServiceResult<(StatusCode, Json<Value>)> {
    let entry = service
        .notify_change(
            &notification.cv_id,
            notification.operation,
            notification.profile.as_ref(),
        )
        .await?;
    tracing::info!(
        cv_id = %notification.cv_id,
        operation = %notification.operation,
        entry = %entry,
        "Profile change notification received"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": format!(
                "Profile change notification received and processing started for {}",
                notification.cv_id
            )
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_notification_profile_is_optional() {
        let parsed: ChangeNotification =
            serde_json::from_value(json!({"cvId": "X", "operation": "DELETE"})).unwrap();
        assert_eq!(parsed.operation, Operation::Delete);
        assert!(parsed.profile.is_none());
    }

    #[test]
    fn change_notification_rejects_unknown_operation() {
        let parsed =
            serde_json::from_value::<ChangeNotification>(json!({"cvId": "X", "operation": "MERGE"}));
        assert!(parsed.is_err());
    }
}
