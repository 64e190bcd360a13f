//! talent-sync-server binary entry point.
//!
//! Usage:
//! ```bash
//! talent-sync-server --config talent-sync.toml
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sync_client::ReqwestTransport;
use talent_sync_server::config::{Config, StorageConfig};
use talent_sync_server::http::{build_router, health::init_start_time};
use talent_sync_server::scheduler::{spawn_redrive_task, spawn_sync_task};
use talent_sync_server::server::SyncService;
use talent_sync_server::storage::SqliteStorage;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = get_config_path();
    let config = load_config(&config_path)?;

    let storage = open_storage(&config.storage).await?;
    let transport = Arc::new(ReqwestTransport::new());

    let bind_address = config.server.bind_address.clone();
    let scheduler = config.scheduler.clone();
    let service = Arc::new(SyncService::start(config, storage, transport));

    let sync_task = spawn_sync_task(service.clone(), scheduler.clone());
    let redrive_task = spawn_redrive_task(service.clone(), scheduler);

    init_start_time();
    let app = build_router(service.clone());
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    tracing::info!("talent-sync-server v{} listening on {}", env!("CARGO_PKG_VERSION"), bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    sync_task.abort();
    redrive_task.abort();
    service.shutdown();
    service.storage().close().await;
    tracing::info!("Shut down");

    Ok(())
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("talent-sync.toml"))
}

fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::warn!("Configuration file {:?} not found, using defaults", path);
        return Ok(Config::default());
    }
    Config::from_file(path).with_context(|| format!("Failed to load configuration {:?}", path))
}

async fn open_storage(config: &StorageConfig) -> Result<SqliteStorage> {
    SqliteStorage::new(&config.database)
        .await
        .with_context(|| format!("Failed to open database {}", config.database.display()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
