//! Configuration loading for talent-sync.
//!
//! Configuration is loaded from a TOML file (default: `talent-sync.toml`).
//! Every section and every field is optional.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use sync_core::{Backoff, RetryPolicy};

/// Root configuration for talent-sync.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Matching partner delivery.
    #[serde(default)]
    pub partner: PartnerConfig,
    /// Bulk handoff to the peer service.
    #[serde(default)]
    pub bulk: BulkConfig,
    /// Periodic triggers.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Delivery worker pool.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP server (default: 0.0.0.0:8000).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

/// Matching partner configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PartnerConfig {
    /// Endpoint receiving single profile changes.
    #[serde(default = "default_partner_url")]
    pub url: String,
    /// Per-request timeout in seconds (default: 10).
    #[serde(default = "default_partner_timeout")]
    pub timeout_secs: u64,
    /// Attempts per delivery round (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed delay between attempts in milliseconds (default: 5000).
    #[serde(default = "default_partner_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Delivery rounds after which re-drive leaves an entry alone (default: 5).
    #[serde(default = "default_max_delivery_rounds")]
    pub max_delivery_rounds: u32,
}

/// Peer bulk endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkConfig {
    /// Endpoint receiving `{profiles: [...]}`.
    #[serde(default = "default_bulk_url")]
    pub url: String,
    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_bulk_timeout")]
    pub timeout_secs: u64,
    /// Retry ceiling for sync jobs (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_retries: u32,
    /// Exponential backoff base in milliseconds (default: 60000).
    #[serde(default = "default_bulk_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

/// Periodic trigger configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Enable the primary sync loop (default: true).
    #[serde(default = "default_true")]
    pub sync_enabled: bool,
    /// Primary sync interval in seconds (default: 3600 = 1 hour).
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    /// Enable the re-drive loop (default: true).
    #[serde(default = "default_true")]
    pub redrive_enabled: bool,
    /// Re-drive interval in seconds (default: 900 = 15 minutes).
    #[serde(default = "default_redrive_interval")]
    pub redrive_interval_secs: u64,
    /// Minimum age in seconds of an unsynced change before re-drive
    /// picks it up (default: 60).
    #[serde(default = "default_redrive_grace")]
    pub redrive_grace_secs: u64,
}

/// Delivery worker pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    /// Number of worker tasks (default: 4).
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Bounded queue capacity (default: 1024).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Lease length in seconds for claimed work (default: 300).
    #[serde(default = "default_lease")]
    pub lease_secs: u64,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("talent-sync.db")
}

fn default_partner_url() -> String {
    "http://localhost:9000/api/profiles".to_string()
}

fn default_partner_timeout() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_partner_retry_delay_ms() -> u64 {
    5_000
}

fn default_max_delivery_rounds() -> u32 {
    5
}

fn default_bulk_url() -> String {
    "http://localhost:8000/api/bulk".to_string()
}

fn default_bulk_timeout() -> u64 {
    30
}

fn default_bulk_backoff_base_ms() -> u64 {
    60_000
}

fn default_sync_interval() -> u64 {
    3600 // 1 hour
}

fn default_redrive_interval() -> u64 {
    900 // 15 minutes
}

fn default_redrive_grace() -> u64 {
    60
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_lease() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            metrics_enabled: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl Default for PartnerConfig {
    fn default() -> Self {
        Self {
            url: default_partner_url(),
            timeout_secs: default_partner_timeout(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_partner_retry_delay_ms(),
            max_delivery_rounds: default_max_delivery_rounds(),
        }
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            url: default_bulk_url(),
            timeout_secs: default_bulk_timeout(),
            max_retries: default_max_attempts(),
            backoff_base_ms: default_bulk_backoff_base_ms(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_enabled: true,
            sync_interval_secs: default_sync_interval(),
            redrive_enabled: true,
            redrive_interval_secs: default_redrive_interval(),
            redrive_grace_secs: default_redrive_grace(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            lease_secs: default_lease(),
        }
    }
}

impl PartnerConfig {
    /// Retry policy for one delivery round.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: Backoff::Fixed(Duration::from_millis(self.retry_delay_ms)),
        }
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl BulkConfig {
    /// Retry policy for sync jobs.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(self.backoff_base_ms),
            },
        }
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DispatcherConfig {
    /// Lease length.
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_matches_reference_schedule() {
        let config = Config::default();
        assert_eq!(config.scheduler.sync_interval_secs, 3600);
        assert_eq!(config.scheduler.redrive_interval_secs, 900);
        assert_eq!(config.partner.timeout(), Duration::from_secs(10));
        assert_eq!(config.bulk.timeout(), Duration::from_secs(30));
        assert_eq!(config.dispatcher.lease(), Duration::from_secs(300));
    }

    #[test]
    fn default_policies() {
        let config = Config::default();
        assert_eq!(config.partner.retry_policy(), RetryPolicy::partner_default());
        assert_eq!(config.bulk.retry_policy(), RetryPolicy::bulk_default());
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
bind_address = "127.0.0.1:5000"

[storage]
database = "/data/talent-sync.db"

[partner]
url = "https://partner.example/api/profiles"
retry_delay_ms = 10

[bulk]
max_retries = 5

[scheduler]
redrive_enabled = false

[dispatcher]
workers = 8
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:5000");
        assert_eq!(config.storage.database, PathBuf::from("/data/talent-sync.db"));
        assert_eq!(config.partner.url, "https://partner.example/api/profiles");
        assert_eq!(config.partner.retry_policy().delay_for(1), Duration::from_millis(10));
        assert_eq!(config.bulk.max_retries, 5);
        assert!(!config.scheduler.redrive_enabled);
        assert!(config.scheduler.sync_enabled);
        assert_eq!(config.dispatcher.workers, 8);
    }

    #[test]
    fn config_missing_sections_use_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.partner.max_attempts, 3);
        assert_eq!(config.partner.max_delivery_rounds, 5);
        assert_eq!(config.dispatcher.queue_capacity, 1024);
    }

    #[test]
    fn config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[bulk]\nurl = \"http://peer/api/bulk\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.bulk.url, "http://peer/api/bulk");
    }

    #[test]
    fn config_from_missing_file_is_read_error() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/talent-sync.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn config_with_bad_types_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[dispatcher]\nworkers = \"many\"").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
