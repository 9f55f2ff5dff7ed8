use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

mod config;
mod constants;
mod cron;
mod database;
mod dispatcher;
mod errors;
mod invoker;
mod maintenance;
mod web;

use config::Config;
use database::Database;
use dispatcher::Dispatcher;
use invoker::HttpInvoker;
use maintenance::Maintenance;
use web::{start_web_server, AppState};

const CONFIG_PATH: &str = "config/cronmaster.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with reduced verbosity
    let env_filter = EnvFilter::from_default_env()
        .add_directive("cronmaster=info".parse()?)
        .add_directive("tower_http=warn".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("sqlx=warn".parse()?);

    fmt().with_env_filter(env_filter).init();

    info!("Starting CronMaster scheduler");

    // Load configuration
    let config = Arc::new(Config::load(CONFIG_PATH).await?);
    info!(
        "Configuration loaded: request timeout {} ms, retention {} days",
        config.request_timeout_ms, config.execution_retention_days
    );

    // Initialize database
    let database = Arc::new(Database::new(&config.database_path).await?);

    // Initialize HTTP invoker
    let invoker = Arc::new(HttpInvoker::new(&config)?);
    info!("HTTP invoker initialized");

    // Initialize dispatcher
    let dispatcher = Dispatcher::new(database.clone(), invoker.clone(), &config);
    info!("Dispatcher initialized");

    // Initialize maintenance and run startup tasks: reclaim orphaned
    // executions, then arm every active job
    let maintenance = Arc::new(Maintenance::new(
        database.clone(),
        dispatcher.clone(),
        config.clone(),
    ));
    maintenance.run_startup_tasks().await?;
    info!(
        "Startup reconciliation complete: {} job(s) armed",
        dispatcher.armed_count().await
    );

    // Periodic live-set reconciliation
    let reconcile_maintenance = maintenance.clone();
    let reconcile_interval = config.reconcile_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(reconcile_interval);
        interval.tick().await; // first tick fires immediately; startup already reconciled
        loop {
            interval.tick().await;
            if let Err(e) = reconcile_maintenance.reconcile().await {
                warn!("Reconciliation error: {}", e);
            }
        }
    });

    // Periodic execution pruning
    let prune_maintenance = maintenance.clone();
    let prune_interval = config.prune_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(prune_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = prune_maintenance.prune().await {
                warn!("Execution pruning error: {}", e);
            }
        }
    });

    // Per-minute health snapshot
    let health_maintenance = maintenance.clone();
    let health_interval = config.health_snapshot_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(health_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            let snapshot = health_maintenance.health_snapshot().await;
            info!(
                uptime_seconds = snapshot.uptime_seconds,
                armed_jobs = snapshot.armed_jobs,
                memory_rss_kb = snapshot.memory_rss_kb,
                reconcile_lag_seconds = snapshot.reconcile_lag_seconds,
                "health snapshot"
            );
        }
    });

    info!("Background tasks started");

    // Probe server runs until ctrl-c, then the dispatcher drains
    let state = AppState::new(config.clone(), database, dispatcher.clone());
    let server = tokio::spawn(async move {
        if let Err(e) = start_web_server(state).await {
            warn!("Probe server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    dispatcher.shutdown(config.shutdown_drain_deadline()).await;
    server.abort();
    info!("CronMaster stopped");

    Ok(())
}
