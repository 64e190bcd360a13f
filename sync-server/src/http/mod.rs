//! HTTP endpoints for talent-sync.
//!
//! Inbound profile data, talent pool management, sync job operations,
//! health checks and metrics.

pub mod health;
mod ingest;
mod jobs;
mod metrics;
mod pools;

use crate::server::SyncService;
use axum::{
    routing::{delete, get, post, put},
    Extension, Router,
};
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(service: Arc<SyncService>) -> Router {
    let mut router = Router::new().route("/health", get(health::health_handler));

    if service.config().server.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }

    router
        .route("/api/bulk", post(ingest::bulk_handler))
        .route("/api/profiles/changes", post(ingest::change_handler))
        .route(
            "/api/talent-pools",
            get(pools::list_pools).post(pools::create_pool),
        )
        .route("/api/talent-pools/:id", get(pools::get_pool))
        .route("/api/talent-pools/:id/members", put(pools::upsert_member))
        .route(
            "/api/talent-pools/:id/members/:cv_id",
            delete(pools::remove_member),
        )
        .route("/api/trigger-sync", post(jobs::trigger_sync))
        .route("/api/sync-jobs", get(jobs::list_jobs))
        .route("/api/sync-jobs/:id/reset", post(jobs::reset_job))
        .layer(Extension(service))
}
