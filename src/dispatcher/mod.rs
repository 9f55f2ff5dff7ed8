//! Dispatcher
//!
//! Keeps the set of active jobs armed and fires each at its scheduled
//! instants. Every armed job runs as its own task: it sleeps until the
//! job row's `next_execution`, snapshots the request template, records the
//! execution, invokes, and finalizes. Finalization advances `next_execution`
//! and re-arms the loop. Firings of distinct jobs are independent; a single
//! job never has more than one scheduled firing in flight.
//!
//! The live set is a best-effort mirror of `status = 'active'` rows; the
//! database stays authoritative and the reconciler converges the two.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::constants::scheduling::{
    DRAIN_POLL_INTERVAL, FINALIZE_RETRY_BACKOFF_MS, HARD_CANCEL_GRACE, JOB_RELOAD_BACKOFF,
    SHUTDOWN_DEADLINE_CAP,
};
use crate::cron;
use crate::database::{
    Database, ExecutionOutcome, Job, JobStatus, TriggeredBy,
};
use crate::errors::{CoreError, CoreResult};
use crate::invoker::{HttpInvoker, RequestSnapshot};

/// Scheduler statistics exposed through the control surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchedulerStats {
    pub armed_jobs: usize,
    pub started_at: DateTime<Utc>,
    pub last_reconcile: Option<DateTime<Utc>>,
}

struct ArmedJob {
    generation: u64,
    cancel: watch::Sender<bool>,
    #[allow(dead_code)]
    handle: JoinHandle<()>,
}

struct DispatcherInner {
    database: Arc<Database>,
    invoker: Arc<HttpInvoker>,
    live: RwLock<HashMap<i64, ArmedJob>>,
    /// exec_id -> job_id for every invocation currently in flight
    in_flight: Mutex<HashMap<i64, i64>>,
    shutting_down: AtomicBool,
    hard_cancel: watch::Sender<bool>,
    firing_gate: Option<Arc<Semaphore>>,
    arm_seq: AtomicU64,
    cancelled_on_shutdown: AtomicU64,
    started_at: DateTime<Utc>,
    last_reconcile: Mutex<Option<DateTime<Utc>>>,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn new(database: Arc<Database>, invoker: Arc<HttpInvoker>, config: &Config) -> Self {
        let (hard_cancel, _) = watch::channel(false);
        let firing_gate = config
            .max_concurrent_firings
            .map(|permits| Arc::new(Semaphore::new(permits)));

        Self {
            inner: Arc::new(DispatcherInner {
                database,
                invoker,
                live: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                shutting_down: AtomicBool::new(false),
                hard_cancel,
                firing_gate,
                arm_seq: AtomicU64::new(0),
                cancelled_on_shutdown: AtomicU64::new(0),
                started_at: Utc::now(),
                last_reconcile: Mutex::new(None),
            }),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Arm a job. Loads the row; only `active` jobs are armed. An already
    /// armed job is disarmed and re-armed, which is how updates take effect.
    pub async fn add_job(&self, job_id: i64) -> CoreResult<()> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Ok(());
        }

        let job = self.inner.database.get_job_unscoped(job_id).await?;
        let mut live = self.inner.live.write().await;

        if let Some(previous) = live.remove(&job_id) {
            let _ = previous.cancel.send(true);
        }

        match job {
            Some(job) if job.status == JobStatus::Active => {
                let generation = self.inner.arm_seq.fetch_add(1, Ordering::SeqCst);
                let (cancel_tx, cancel_rx) = watch::channel(false);
                let inner = self.inner.clone();
                let handle =
                    tokio::spawn(job_loop(inner, job_id, generation, cancel_rx));
                live.insert(
                    job_id,
                    ArmedJob {
                        generation,
                        cancel: cancel_tx,
                        handle,
                    },
                );
                debug!("Armed job {}", job_id);
            }
            _ => {
                debug!("Job {} is not active; not arming", job_id);
            }
        }
        Ok(())
    }

    /// Disarm a job and drop its handle. Idempotent.
    pub async fn remove_job(&self, job_id: i64) {
        let mut live = self.inner.live.write().await;
        if let Some(armed) = live.remove(&job_id) {
            let _ = armed.cancel.send(true);
            debug!("Disarmed job {}", job_id);
        }
    }

    /// Run the firing sequence once, immediately, for a job owned by
    /// `user_id`. Does not touch the scheduled arming; a manual trigger may
    /// overlap a scheduled firing of the same job.
    pub async fn trigger(&self, user_id: i64, job_id: i64) -> CoreResult<i64> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(CoreError::validation("scheduler is shutting down"));
        }
        let job = self.inner.database.get_job(user_id, job_id).await?;
        info!("Manual trigger for job {}", job_id);
        fire_once(&self.inner, &job, TriggeredBy::Manual).await
    }

    pub async fn armed_ids(&self) -> Vec<i64> {
        self.inner.live.read().await.keys().copied().collect()
    }

    pub async fn armed_count(&self) -> usize {
        self.inner.live.read().await.len()
    }

    pub async fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            armed_jobs: self.armed_count().await,
            started_at: self.inner.started_at,
            last_reconcile: *self.inner.last_reconcile.lock().unwrap(),
        }
    }

    /// Recorded by the reconciler after each convergence pass.
    pub fn note_reconciled(&self, at: DateTime<Utc>) {
        *self.inner.last_reconcile.lock().unwrap() = Some(at);
    }

    pub fn last_reconcile(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_reconcile.lock().unwrap()
    }

    /// Stop arming new firings, wait up to `deadline` for in-flight
    /// invocations to finalize, then cancel the rest. Cancelled invocations
    /// are recorded as `cancelled` execution rows before this returns.
    pub async fn shutdown(&self, deadline: Duration) {
        let deadline = deadline.min(SHUTDOWN_DEADLINE_CAP);
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        let mut live = self.inner.live.write().await;
        let disarmed = live.len();
        for (_, armed) in live.drain() {
            let _ = armed.cancel.send(true);
        }
        drop(live);
        info!(
            "Shutdown: disarmed {} job(s), draining in-flight firings for up to {:?}",
            disarmed, deadline
        );

        if !self.wait_for_drain(deadline).await {
            let remaining = self.inner.in_flight.lock().unwrap().len();
            warn!(
                "Drain deadline elapsed with {} invocation(s) in flight; cancelling",
                remaining
            );
            let _ = self.inner.hard_cancel.send(true);
            if !self.wait_for_drain(HARD_CANCEL_GRACE).await {
                error!("In-flight invocations failed to finalize after cancellation");
            }
        }

        let cancelled = self.inner.cancelled_on_shutdown.load(Ordering::SeqCst);
        info!("Dispatcher shut down ({} invocation(s) cancelled)", cancelled);
    }

    async fn wait_for_drain(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if self.inner.in_flight.lock().unwrap().is_empty() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}

/// Recurring task for one armed job. Exits when cancelled, when the job
/// leaves the active state, or on an invariant breach (which disarms the
/// job and leaves the row for inspection).
async fn job_loop(
    inner: Arc<DispatcherInner>,
    job_id: i64,
    generation: u64,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }

        let job = match inner.database.get_job_unscoped(job_id).await {
            Ok(Some(job)) if job.status == JobStatus::Active => job,
            Ok(_) => {
                debug!("Job {} no longer active; disarming", job_id);
                break;
            }
            Err(e) => {
                warn!("Failed to reload job {}: {}; retrying", job_id, e);
                tokio::select! {
                    _ = tokio::time::sleep(JOB_RELOAD_BACKOFF) => continue,
                    _ = cancel.changed() => return,
                }
            }
        };

        let scheduled = match job.next_execution {
            Some(at) => at,
            None => {
                error!(
                    "Armed job {} has no next_execution; disarming for inspection",
                    job_id
                );
                break;
            }
        };

        let now = Utc::now();
        if scheduled > now {
            let wait = (scheduled - now).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.changed() => return,
            }
            // Re-read the row so the firing snapshot reflects any update
            // that landed while sleeping
            continue;
        }

        log_missed_instants(&job, scheduled, now);

        match fire_once(&inner, &job, TriggeredBy::Cron).await {
            Ok(_) => {}
            Err(e) if matches!(e, CoreError::SchedulerInternal(_)) => {
                error!("Job {} firing hit an internal error: {}; disarming", job_id, e);
                break;
            }
            Err(e) => {
                warn!("Job {} firing could not be recorded: {}", job_id, e);
                tokio::select! {
                    _ = tokio::time::sleep(JOB_RELOAD_BACKOFF) => {}
                    _ = cancel.changed() => return,
                }
            }
        }
    }

    // Natural exit: clear our own live-set entry unless a newer arming of
    // this job already replaced it
    let mut live = inner.live.write().await;
    if live.get(&job_id).map(|a| a.generation) == Some(generation) {
        live.remove(&job_id);
    }
}

/// When the process falls behind, earlier missed instants are skipped and
/// only the most recent one fires.
fn log_missed_instants(job: &Job, scheduled: DateTime<Utc>, now: DateTime<Utc>) {
    let expr = match cron::parse(&job.cron_expression) {
        Ok(e) => e,
        Err(_) => return,
    };
    let tz = match cron::parse_timezone(&job.timezone) {
        Ok(t) => t,
        Err(_) => return,
    };

    let mut missed = 0u64;
    let mut at = scheduled;
    while let Some(next) = cron::next_after(&expr, tz, at) {
        if next > now || missed >= 1000 {
            break;
        }
        missed += 1;
        at = next;
    }
    if missed > 0 {
        warn!(
            "Job {} fell behind: skipping {} missed firing instant(s), executing the most recent",
            job.id, missed
        );
    }
}

/// One complete firing: snapshot, record start, invoke (bounded by the
/// request timeout and by shutdown cancellation), finalize with bounded
/// retries. Returns the execution row id.
async fn fire_once(
    inner: &Arc<DispatcherInner>,
    job: &Job,
    triggered_by: TriggeredBy,
) -> CoreResult<i64> {
    let _permit = match &inner.firing_gate {
        Some(gate) => Some(
            gate.clone()
                .acquire_owned()
                .await
                .map_err(|_| CoreError::internal("firing gate closed"))?,
        ),
        None => None,
    };

    let snapshot = RequestSnapshot::from_job(job);
    let exec_id = inner
        .database
        .record_execution_start(job.id, triggered_by)
        .await?;
    inner.in_flight.lock().unwrap().insert(exec_id, job.id);

    let started = Instant::now();
    let mut hard_cancel = inner.hard_cancel.subscribe();
    let outcome = tokio::select! {
        outcome = inner.invoker.invoke(&snapshot) => outcome,
        _ = hard_cancel.changed() => {
            inner.cancelled_on_shutdown.fetch_add(1, Ordering::SeqCst);
            ExecutionOutcome::cancelled(started.elapsed().as_millis() as i64)
        }
    };

    let result = finalize_with_retry(inner, exec_id, &outcome).await;
    inner.in_flight.lock().unwrap().remove(&exec_id);
    result.map(|_| exec_id)
}

/// Finalize an execution, retrying only the database write on transaction
/// conflicts. The invocation outcome is preserved across retries; the HTTP
/// call is never repeated.
async fn finalize_with_retry(
    inner: &Arc<DispatcherInner>,
    exec_id: i64,
    outcome: &ExecutionOutcome,
) -> CoreResult<()> {
    let mut attempt = 0usize;
    loop {
        match inner.database.record_execution_end(exec_id, outcome).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_concurrency() && attempt < FINALIZE_RETRY_BACKOFF_MS.len() => {
                let backoff = FINALIZE_RETRY_BACKOFF_MS[attempt];
                warn!(
                    "Finalization of execution {} conflicted ({}); retry in {} ms",
                    exec_id, e, backoff
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                attempt += 1;
            }
            Err(e) => {
                error!("Giving up finalizing execution {}: {}", exec_id, e);
                return Err(e);
            }
        }
    }
}
