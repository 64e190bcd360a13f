//! # talent-sync
//!
//! Operator CLI for a talent-sync database.
//!
//! ## Commands
//!
//! - `status`: Show job, change log and pool totals
//! - `jobs`: List sync jobs
//! - `reset-job`: Move a failed sync job back to pending
//! - `reset-entry`: Give an unsynced change fresh delivery rounds
//! - `redrive`: Move every eligible failed job back to pending
//!
//! A running server picks up work released here on its next re-drive pass.
//!
//! ## Example
//!
//! ```bash
//! talent-sync --config talent-sync.toml status
//! talent-sync jobs --status failed
//! talent-sync reset-job 3f2b9c1e-6a7d-4e0b-9f59-1c2d3e4f5a6b
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use sync_server::config::Config;
use sync_server::storage::SqliteStorage;

mod commands;

use commands::{jobs, redrive, reset, status};

/// Operator CLI for talent-sync.
#[derive(Parser, Debug)]
#[command(name = "talent-sync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server configuration file (database path and retry limits)
    #[arg(long, global = true, default_value = "talent-sync.toml")]
    config: PathBuf,

    /// Database file; overrides the configuration
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show job, change log and pool totals
    Status,

    /// List sync jobs, newest first
    Jobs {
        /// Only jobs in this status (pending, success, failed)
        #[arg(long)]
        status: Option<String>,

        /// Maximum number of jobs to list
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Move a failed sync job back to pending with a fresh retry budget
    ResetJob {
        /// Sync job id
        id: String,
    },

    /// Give an unsynced change log entry fresh delivery rounds
    ResetEntry {
        /// Change log entry id
        id: u64,
    },

    /// Move every failed job below the retry ceiling back to pending
    Redrive,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    let database = cli
        .database
        .unwrap_or_else(|| config.storage.database.clone());

    let storage = SqliteStorage::new(&database)
        .await
        .with_context(|| format!("Failed to open database {:?}", database))?;

    let result = match cli.command {
        Commands::Status => status::run(&storage).await,
        Commands::Jobs { status, limit } => {
            jobs::run(&storage, status.as_deref(), limit, config.bulk.max_retries).await
        }
        Commands::ResetJob { id } => reset::job(&storage, &id).await,
        Commands::ResetEntry { id } => reset::entry(&storage, id).await,
        Commands::Redrive => redrive::run(&storage, config.bulk.max_retries).await,
    };

    storage.close().await;
    result
}

/// Load the server configuration, falling back to defaults when absent.
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    Config::from_file(path).with_context(|| format!("Failed to load configuration {:?}", path))
}
