//! Prometheus metrics endpoint.

use crate::server::SyncService;
use crate::storage::{ChangeLog, SyncJobStore};
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Counters are monotonic since startup; gauges are read from storage on
/// every scrape.
pub async fn metrics_handler(Extension(service): Extension<Arc<SyncService>>) -> impl IntoResponse {
    let m = service.metrics();

    let changes_recorded = m.changes_recorded.load(Ordering::Relaxed);
    let partner_ok = m.partner_deliveries_ok.load(Ordering::Relaxed);
    let partner_failed = m.partner_attempts_failed.load(Ordering::Relaxed);
    let partner_exhausted = m.partner_rounds_exhausted.load(Ordering::Relaxed);
    let skipped = m.changes_skipped.load(Ordering::Relaxed);
    let changes_redriven = m.changes_redriven.load(Ordering::Relaxed);
    let jobs_created = m.jobs_created.load(Ordering::Relaxed);
    let bulk_ok = m.bulk_deliveries_ok.load(Ordering::Relaxed);
    let bulk_failed = m.bulk_attempts_failed.load(Ordering::Relaxed);
    let jobs_failed = m.jobs_failed.load(Ordering::Relaxed);
    let jobs_redriven = m.jobs_redriven.load(Ordering::Relaxed);

    // Storage stats (best effort)
    let storage = service.storage();
    let counts = storage.job_counts().await.unwrap_or_default();
    let entries = storage.count_entries().await.unwrap_or(0);
    let unsynced = storage.count_unsynced_heads().await.unwrap_or(0);
    let pools = storage.count_pools().await.unwrap_or(0);
    let profiles = storage.count_profiles().await.unwrap_or(0);
    let queued = service.dispatcher().queued();

    let body = format!(
        r#"# HELP talent_sync_info Server information
# TYPE talent_sync_info gauge
talent_sync_info{{version="{version}"}} 1

# HELP talent_sync_changes_recorded_total Change log entries recorded
# TYPE talent_sync_changes_recorded_total counter
talent_sync_changes_recorded_total {changes_recorded}

# HELP talent_sync_partner_deliveries_total Changes confirmed by the matching partner
# TYPE talent_sync_partner_deliveries_total counter
talent_sync_partner_deliveries_total {partner_ok}

# HELP talent_sync_partner_attempts_failed_total Failed partner attempts
# TYPE talent_sync_partner_attempts_failed_total counter
talent_sync_partner_attempts_failed_total {partner_failed}

# HELP talent_sync_partner_rounds_exhausted_total Delivery rounds that ran out of attempts
# TYPE talent_sync_partner_rounds_exhausted_total counter
talent_sync_partner_rounds_exhausted_total {partner_exhausted}

# HELP talent_sync_changes_skipped_total Changes with no profile body to send
# TYPE talent_sync_changes_skipped_total counter
talent_sync_changes_skipped_total {skipped}

# HELP talent_sync_changes_redriven_total Changes queued again by re-drive
# TYPE talent_sync_changes_redriven_total counter
talent_sync_changes_redriven_total {changes_redriven}

# HELP talent_sync_jobs_created_total Sync jobs created
# TYPE talent_sync_jobs_created_total counter
talent_sync_jobs_created_total {jobs_created}

# HELP talent_sync_bulk_deliveries_total Sync jobs delivered
# TYPE talent_sync_bulk_deliveries_total counter
talent_sync_bulk_deliveries_total {bulk_ok}

# HELP talent_sync_bulk_attempts_failed_total Failed bulk attempts
# TYPE talent_sync_bulk_attempts_failed_total counter
talent_sync_bulk_attempts_failed_total {bulk_failed}

# HELP talent_sync_jobs_failed_total Sync jobs that reached the retry ceiling
# TYPE talent_sync_jobs_failed_total counter
talent_sync_jobs_failed_total {jobs_failed}

# HELP talent_sync_jobs_redriven_total Failed sync jobs moved back to pending
# TYPE talent_sync_jobs_redriven_total counter
talent_sync_jobs_redriven_total {jobs_redriven}

# HELP talent_sync_jobs Sync jobs by status
# TYPE talent_sync_jobs gauge
talent_sync_jobs{{status="pending"}} {pending}
talent_sync_jobs{{status="success"}} {success}
talent_sync_jobs{{status="failed"}} {failed}

# HELP talent_sync_change_log_entries Change log entries in the database
# TYPE talent_sync_change_log_entries gauge
talent_sync_change_log_entries {entries}

# HELP talent_sync_unsynced_changes Subject/operation pairs awaiting delivery
# TYPE talent_sync_unsynced_changes gauge
talent_sync_unsynced_changes {unsynced}

# HELP talent_sync_talent_pools Talent pools in the database
# TYPE talent_sync_talent_pools gauge
talent_sync_talent_pools {pools}

# HELP talent_sync_profiles Profile snapshots in the database
# TYPE talent_sync_profiles gauge
talent_sync_profiles {profiles}

# HELP talent_sync_dispatch_queued Tasks waiting in the dispatch queue
# TYPE talent_sync_dispatch_queued gauge
talent_sync_dispatch_queued {queued}
"#,
        version = env!("CARGO_PKG_VERSION"),
        pending = counts.pending,
        success = counts.success,
        failed = counts.failed,
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::SqliteStorage;
    use axum::body::to_bytes;
    use sync_client::MockTransport;

    #[tokio::test]
    async fn metrics_render_counters_and_gauges() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let service = Arc::new(SyncService::start(
            Config::default(),
            storage,
            Arc::new(MockTransport::new()),
        ));
        service.metrics().jobs_created.fetch_add(3, Ordering::Relaxed);

        let response = metrics_handler(Extension(service)).await.into_response();
        let content_type = response.headers()[CONTENT_TYPE].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/plain"));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("talent_sync_jobs_created_total 3"));
        assert!(text.contains("talent_sync_jobs{status=\"pending\"} 0"));
        assert!(text.contains("# TYPE talent_sync_unsynced_changes gauge"));
    }
}
