//! Error types for talent-sync.

use thiserror::Error;

/// Errors that can occur when parsing or encoding talent-sync types.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Unknown operation tag
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Identifier could not be parsed
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// JSON encoding or decoding failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SyncError::InvalidOperation("UPSERT".into());
        assert_eq!(err.to_string(), "invalid operation: UPSERT");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SyncError>();
    }
}
