//! Maintenance tasks
//!
//! Three scheduled tasks keep the process honest: live-set reconciliation
//! against the database of record, pruning of expired execution rows, and a
//! startup-only reclaim of executions orphaned by a previous process. A
//! per-minute health snapshot is logged as an observability signal.

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::database::Database;
use crate::dispatcher::Dispatcher;

pub struct Maintenance {
    database: Arc<Database>,
    dispatcher: Dispatcher,
    config: Arc<Config>,
    process_start: DateTime<Utc>,
}

/// Point-in-time health record. Logged once a minute; not a control input.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub generated_at: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub armed_jobs: usize,
    pub memory_rss_kb: Option<u64>,
    pub reconcile_lag_seconds: Option<i64>,
}

impl Maintenance {
    pub fn new(database: Arc<Database>, dispatcher: Dispatcher, config: Arc<Config>) -> Self {
        Self {
            database,
            dispatcher,
            config,
            process_start: Utc::now(),
        }
    }

    /// Startup sequence: reclaim orphans left by a crashed predecessor, then
    /// arm every active job.
    pub async fn run_startup_tasks(&self) -> Result<()> {
        let reclaimed = self
            .database
            .reclaim_orphaned_running(self.process_start)
            .await?;
        if reclaimed > 0 {
            warn!(
                "Reclaimed {} orphaned running execution(s) from a previous process",
                reclaimed
            );
        }

        self.reconcile().await?;
        Ok(())
    }

    /// Converge the dispatcher's live set to the authoritative set of
    /// active jobs. Guards against out-of-process mutations and lost
    /// in-process events.
    pub async fn reconcile(&self) -> Result<()> {
        let active: HashSet<i64> = self
            .database
            .list_active_jobs()
            .await?
            .into_iter()
            .map(|job| job.id)
            .collect();
        let live: HashSet<i64> = self.dispatcher.armed_ids().await.into_iter().collect();

        let mut armed = 0usize;
        for job_id in active.difference(&live) {
            if let Err(e) = self.dispatcher.add_job(*job_id).await {
                warn!("Reconcile failed to arm job {}: {}", job_id, e);
            } else {
                armed += 1;
            }
        }

        let mut disarmed = 0usize;
        for job_id in live.difference(&active) {
            self.dispatcher.remove_job(*job_id).await;
            disarmed += 1;
        }

        let now = Utc::now();
        self.dispatcher.note_reconciled(now);
        if armed > 0 || disarmed > 0 {
            info!(
                "Reconciled live set: {} armed, {} disarmed, {} active total",
                armed,
                disarmed,
                active.len()
            );
        }
        Ok(())
    }

    /// Delete execution rows older than the configured retention.
    pub async fn prune(&self) -> Result<u64> {
        let cutoff =
            Utc::now() - ChronoDuration::days(self.config.execution_retention_days as i64);
        let pruned = self.database.prune_executions(cutoff).await?;
        if pruned > 0 {
            info!(
                "Pruned {} execution(s) older than {} days",
                pruned, self.config.execution_retention_days
            );
        }
        Ok(pruned)
    }

    pub async fn health_snapshot(&self) -> HealthSnapshot {
        let now = Utc::now();
        let reconcile_lag_seconds = self
            .dispatcher
            .last_reconcile()
            .map(|at| (now - at).num_seconds());

        HealthSnapshot {
            generated_at: now,
            uptime_seconds: (now - self.process_start).num_seconds(),
            armed_jobs: self.dispatcher.armed_count().await,
            memory_rss_kb: read_rss_kb(),
            reconcile_lag_seconds,
        }
    }

    pub fn process_start(&self) -> DateTime<Utc> {
        self.process_start
    }
}

/// Resident set size from /proc, when the platform provides it.
fn read_rss_kb() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let rss_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_kb = 4; // page size on the supported targets
    Some(rss_pages * page_kb)
}
