//! Unit tests for configuration parsing
//!
//! Every option must default individually so partial files parse, and the
//! shutdown drain deadline must respect its hard cap.

use cronmaster::config::Config;
use std::time::Duration;

#[test]
fn test_defaults() {
    let config = Config::default();

    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.port, 8095);
    assert_eq!(config.database_path, "data/cronmaster.db");
    assert_eq!(config.request_timeout_ms, 30_000);
    assert_eq!(config.response_body_limit_bytes, 10_240);
    assert_eq!(config.execution_retention_days, 30);
    assert_eq!(config.reconcile_interval_ms, 300_000);
    assert_eq!(config.prune_interval_ms, 3_600_000);
    assert_eq!(config.shutdown_drain_deadline_ms, 30_000);
    assert_eq!(config.user_agent, "CronMaster/1.0");
    assert_eq!(config.max_concurrent_firings, None);
}

#[test]
fn test_parse_full_config() {
    let raw = r#"
host = "127.0.0.1"
port = 9000
database_path = "/tmp/jobs.db"
request_timeout_ms = 10000
response_body_limit_bytes = 4096
execution_retention_days = 7
reconcile_interval_ms = 60000
prune_interval_ms = 600000
shutdown_drain_deadline_ms = 5000
user_agent = "TestAgent/2.0"
max_concurrent_firings = 8
    "#;

    let config: Config = toml::from_str(raw).unwrap();

    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.port, 9000);
    assert_eq!(config.database_path, "/tmp/jobs.db");
    assert_eq!(config.request_timeout_ms, 10_000);
    assert_eq!(config.response_body_limit_bytes, 4096);
    assert_eq!(config.execution_retention_days, 7);
    assert_eq!(config.reconcile_interval_ms, 60_000);
    assert_eq!(config.prune_interval_ms, 600_000);
    assert_eq!(config.shutdown_drain_deadline_ms, 5000);
    assert_eq!(config.user_agent, "TestAgent/2.0");
    assert_eq!(config.max_concurrent_firings, Some(8));
}

#[test]
fn test_partial_config_fills_defaults() {
    let raw = r#"
request_timeout_ms = 15000
user_agent = "Probe/1.0"
    "#;

    let config: Config = toml::from_str(raw).unwrap();

    assert_eq!(config.request_timeout_ms, 15_000);
    assert_eq!(config.user_agent, "Probe/1.0");
    // Everything else falls back
    assert_eq!(config.port, 8095);
    assert_eq!(config.execution_retention_days, 30);
    assert_eq!(config.max_concurrent_firings, None);
}

#[test]
fn test_durations() {
    let config = Config::default();
    assert_eq!(config.request_timeout(), Duration::from_secs(30));
    assert_eq!(config.reconcile_interval(), Duration::from_secs(300));
    assert_eq!(config.prune_interval(), Duration::from_secs(3600));
}

#[test]
fn test_shutdown_deadline_hard_cap() {
    let raw = "shutdown_drain_deadline_ms = 120000";
    let config: Config = toml::from_str(raw).unwrap();
    assert_eq!(config.shutdown_drain_deadline(), Duration::from_secs(30));

    let raw = "shutdown_drain_deadline_ms = 5000";
    let config: Config = toml::from_str(raw).unwrap();
    assert_eq!(config.shutdown_drain_deadline(), Duration::from_secs(5));
}

#[tokio::test]
async fn test_load_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.toml");
    let config = Config::load(path.to_str().unwrap()).await.unwrap();
    assert_eq!(config.port, 8095);
}

#[tokio::test]
async fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cronmaster.toml");
    tokio::fs::write(&path, "port = 9911\n").await.unwrap();

    let config = Config::load(path.to_str().unwrap()).await.unwrap();
    assert_eq!(config.port, 9911);
    assert_eq!(config.host, "0.0.0.0");
}
