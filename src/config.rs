//! Runtime configuration
//!
//! Loaded from a TOML file when one exists, otherwise built entirely from
//! defaults. Every option has its own serde default so partial files parse.

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::constants::scheduling::SHUTDOWN_DEADLINE_CAP;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Bind address for the health probe server
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Per-invocation deadline in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Truncation size for captured response bodies
    #[serde(default = "default_response_body_limit_bytes")]
    pub response_body_limit_bytes: usize,

    /// Age past which execution rows are pruned
    #[serde(default = "default_execution_retention_days")]
    pub execution_retention_days: u32,

    /// Period of the live-set reconciliation task
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,

    /// Period of the execution prune task
    #[serde(default = "default_prune_interval_ms")]
    pub prune_interval_ms: u64,

    /// Maximum wait for in-flight firings on shutdown
    #[serde(default = "default_shutdown_drain_deadline_ms")]
    pub shutdown_drain_deadline_ms: u64,

    /// User-Agent sent when the job template does not specify one
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Optional global cap on concurrent firings; unbounded when absent
    #[serde(default)]
    pub max_concurrent_firings: Option<usize>,

    /// Period of the health snapshot record
    #[serde(default = "default_health_snapshot_interval_ms")]
    pub health_snapshot_interval_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8095
}

fn default_database_path() -> String {
    "data/cronmaster.db".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_response_body_limit_bytes() -> usize {
    10_240
}

fn default_execution_retention_days() -> u32 {
    30
}

fn default_reconcile_interval_ms() -> u64 {
    300_000
}

fn default_prune_interval_ms() -> u64 {
    3_600_000
}

fn default_shutdown_drain_deadline_ms() -> u64 {
    30_000
}

fn default_user_agent() -> String {
    "CronMaster/1.0".to_string()
}

fn default_health_snapshot_interval_ms() -> u64 {
    60_000
}

impl Default for Config {
    fn default() -> Self {
        // An empty document resolves every field through its serde default
        toml::from_str("").expect("empty config must deserialize")
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub async fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            info!("No configuration file at {}, using defaults", path);
            return Ok(Config::default());
        }

        let raw = tokio::fs::read_to_string(path).await?;
        let config: Config = toml::from_str(&raw)?;
        info!("Configuration loaded from {}", path);
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms)
    }

    pub fn health_snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.health_snapshot_interval_ms)
    }

    /// Shutdown drain deadline, hard-capped at 30 seconds
    pub fn shutdown_drain_deadline(&self) -> Duration {
        Duration::from_millis(self.shutdown_drain_deadline_ms).min(SHUTDOWN_DEADLINE_CAP)
    }
}
