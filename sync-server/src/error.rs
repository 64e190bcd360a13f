//! Error types for talent-sync-server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::path::PathBuf;

/// Storage layer errors.
///
/// Any of these is fatal to the request that hit it.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored JSON could not be encoded or decoded.
    #[error("payload encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A stored column held a value this version does not understand.
    #[error("corrupt row in {table}: {reason}")]
    Corrupt {
        /// Table the row came from.
        table: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// Referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity.
        entity: &'static str,
        /// The missing id.
        id: String,
    },

    /// Entity already exists.
    #[error("{entity} already exists: {id}")]
    Conflict {
        /// Kind of entity.
        entity: &'static str,
        /// The duplicate id.
        id: String,
    },

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Errors surfaced at the HTTP edge.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Storage failed; the request could not be completed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Requested resource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The request was understood but cannot be applied.
    #[error("{0}")]
    BadRequest(String),
}

impl ServiceError {
    fn status(&self) -> StatusCode {
        match self {
            ServiceError::Storage(StorageError::NotFound { .. }) | ServiceError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ServiceError::Storage(StorageError::Conflict { .. }) | ServiceError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        let body = Json(serde_json::json!({ "detail": self.to_string() }));
        (status, body).into_response()
    }
}

/// Result type alias for HTTP handlers.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
