//! Repository integration tests against an in-memory database
//!
//! Covers job CRUD with ownership scoping, the status/next-execution
//! coupling, counter bookkeeping through execution finalization, orphan
//! reclaim, and pruning.

use chrono::{Duration, Utc};
use cronmaster::database::{
    Database, ExecutionOutcome, ExecutionStatus, HeaderMap, HttpMethod, JobFilter, JobPatch,
    JobStatus, NewJob, NewUser, Page, SortBy, SortOrder, TriggeredBy,
};
use cronmaster::errors::CoreError;

async fn setup() -> (Database, i64) {
    let database = Database::new_in_memory().await.unwrap();
    let user = database
        .create_user(NewUser {
            name: "Alice".into(),
            email: "alice@example.com".into(),
            password_hash: "hash".into(),
        })
        .await
        .unwrap();
    (database, user.id)
}

fn job_spec(name: &str) -> NewJob {
    NewJob {
        name: name.into(),
        url: "https://example.com/hook".into(),
        method: HttpMethod::Get,
        cron_expression: "*/5 * * * *".into(),
        timezone: "UTC".into(),
        headers: HeaderMap::new(),
        body: None,
        description: None,
    }
}

#[tokio::test]
async fn create_and_get_roundtrip() {
    let (db, user) = setup().await;

    let mut spec = job_spec("  Health ping  ");
    spec.description = Some("pings the health endpoint".into());
    spec.headers
        .insert("X-Api-Key".to_string(), "secret".to_string());

    let job = db.create_job(user, spec).await.unwrap();
    assert_eq!(job.name, "Health ping");
    assert_eq!(job.status, JobStatus::Active);
    assert_eq!(job.success_count, 0);
    assert_eq!(job.failure_count, 0);
    assert!(job.last_execution.is_none());
    // Active jobs always carry a future firing instant
    assert!(job.next_execution.unwrap() > job.created_at);
    assert_eq!(job.headers.get("X-Api-Key").unwrap(), "secret");

    let fetched = db.get_job(user, job.id).await.unwrap();
    assert_eq!(fetched.id, job.id);
    assert_eq!(fetched.cron_expression, "*/5 * * * *");
}

#[tokio::test]
async fn create_rejects_invalid_specs() {
    let (db, user) = setup().await;

    let mut bad_name = job_spec("   ");
    bad_name.name = "   ".into();
    assert!(matches!(
        db.create_job(user, bad_name).await,
        Err(CoreError::Validation(_))
    ));

    let mut long_name = job_spec("x");
    long_name.name = "x".repeat(101);
    assert!(db.create_job(user, long_name).await.is_err());

    let mut bad_scheme = job_spec("ftp");
    bad_scheme.url = "ftp://example.com/file".into();
    assert!(db.create_job(user, bad_scheme).await.is_err());

    let mut bad_cron = job_spec("cron");
    bad_cron.cron_expression = "every minute".into();
    assert!(db.create_job(user, bad_cron).await.is_err());

    let mut dead_cron = job_spec("feb30");
    dead_cron.cron_expression = "0 0 30 2 *".into();
    assert!(db.create_job(user, dead_cron).await.is_err());

    let mut bad_tz = job_spec("tz");
    bad_tz.timezone = "Moon/Crater".into();
    assert!(db.create_job(user, bad_tz).await.is_err());

    let mut long_body = job_spec("body");
    long_body.body = Some("b".repeat(10_001));
    assert!(db.create_job(user, long_body).await.is_err());

    let mut bad_header = job_spec("header");
    bad_header
        .headers
        .insert("bad header name".to_string(), "v".to_string());
    assert!(db.create_job(user, bad_header).await.is_err());
}

#[tokio::test]
async fn duplicate_email_is_a_conflict() {
    let (db, _) = setup().await;
    let err = db
        .create_user(NewUser {
            name: "Alice again".into(),
            email: "ALICE@example.com".into(),
            password_hash: "hash2".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
}

#[tokio::test]
async fn ownership_scoping_hides_foreign_jobs() {
    let (db, alice) = setup().await;
    let bob = db
        .create_user(NewUser {
            name: "Bob".into(),
            email: "bob@example.com".into(),
            password_hash: "hash".into(),
        })
        .await
        .unwrap()
        .id;

    let job = db.create_job(alice, job_spec("alices job")).await.unwrap();

    assert!(matches!(
        db.get_job(bob, job.id).await,
        Err(CoreError::NotFound { .. })
    ));
    assert!(db.update_job(bob, job.id, JobPatch::default()).await.is_err());
    assert!(db.delete_job(bob, job.id).await.is_err());
    assert!(db.toggle_job(bob, job.id).await.is_err());

    let (jobs, total) = db
        .list_jobs(bob, &JobFilter::default(), &Page::default())
        .await
        .unwrap();
    assert!(jobs.is_empty());
    assert_eq!(total, 0);

    // Alice still sees it
    let (jobs, total) = db
        .list_jobs(alice, &JobFilter::default(), &Page::default())
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(jobs[0].user_id, alice);
}

#[tokio::test]
async fn listing_filters_searches_and_paginates() {
    let (db, user) = setup().await;

    let mut ping = job_spec("Ping production");
    ping.url = "https://prod.example.com/ping".into();
    db.create_job(user, ping).await.unwrap();

    let mut sync = job_spec("Sync inventory");
    sync.url = "https://warehouse.example.com/sync".into();
    let sync = db.create_job(user, sync).await.unwrap();

    let mut report = job_spec("Nightly report");
    report.url = "https://prod.example.com/report".into();
    db.create_job(user, report).await.unwrap();

    db.toggle_job(user, sync.id).await.unwrap();

    // Case-insensitive substring search over name or URL
    let filter = JobFilter {
        status: None,
        search: Some("PROD".into()),
    };
    let (jobs, total) = db.list_jobs(user, &filter, &Page::default()).await.unwrap();
    assert_eq!(total, 2);
    assert!(jobs.iter().all(|j| j.url.contains("prod")));

    // Status filter
    let filter = JobFilter {
        status: Some(JobStatus::Paused),
        search: None,
    };
    let (jobs, total) = db.list_jobs(user, &filter, &Page::default()).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(jobs[0].id, sync.id);

    // Pagination with stable name ordering
    let page = Page {
        page: 1,
        limit: 2,
        sort_by: SortBy::Name,
        order: SortOrder::Asc,
    };
    let (first_page, total) = db
        .list_jobs(user, &JobFilter::default(), &page)
        .await
        .unwrap();
    assert_eq!(total, 3);
    assert_eq!(first_page.len(), 2);
    assert_eq!(first_page[0].name, "Nightly report");
    assert_eq!(first_page[1].name, "Ping production");

    let page2 = Page { page: 2, ..page };
    let (second_page, _) = db
        .list_jobs(user, &JobFilter::default(), &page2)
        .await
        .unwrap();
    assert_eq!(second_page.len(), 1);
    assert_eq!(second_page[0].name, "Sync inventory");
}

#[tokio::test]
async fn toggle_maintains_status_next_coupling() {
    let (db, user) = setup().await;
    let job = db.create_job(user, job_spec("toggler")).await.unwrap();

    let paused = db.toggle_job(user, job.id).await.unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    assert!(paused.next_execution.is_none());

    let resumed = db.toggle_job(user, job.id).await.unwrap();
    assert_eq!(resumed.status, JobStatus::Active);
    assert!(resumed.next_execution.unwrap() > Utc::now() - Duration::seconds(1));
}

#[tokio::test]
async fn update_recomputes_schedule_and_respects_timezone_rule() {
    let (db, user) = setup().await;
    let job = db.create_job(user, job_spec("updatable")).await.unwrap();

    // Cron change with no timezone in the patch keeps the existing zone
    let patch = JobPatch {
        cron_expression: Some("0 6 * * *".into()),
        ..Default::default()
    };
    let updated = db.update_job(user, job.id, patch).await.unwrap();
    assert_eq!(updated.cron_expression, "0 6 * * *");
    assert_eq!(updated.timezone, "UTC");
    // Recomputed against the new expression: a future 06:00 wall clock
    let next = updated.next_execution.unwrap();
    assert!(next > Utc::now() - Duration::seconds(1));
    assert_eq!(next.time().format("%H:%M").to_string(), "06:00");

    // Timezone change alone also recomputes
    let patch = JobPatch {
        timezone: Some("Asia/Tokyo".into()),
        ..Default::default()
    };
    let retimed = db.update_job(user, job.id, patch).await.unwrap();
    assert_eq!(retimed.timezone, "Asia/Tokyo");
    assert_eq!(retimed.cron_expression, "0 6 * * *");

    // Status to paused clears next_execution
    let patch = JobPatch {
        status: Some(JobStatus::Paused),
        ..Default::default()
    };
    let paused = db.update_job(user, job.id, patch).await.unwrap();
    assert!(paused.next_execution.is_none());

    // Deleting through update is rejected
    let patch = JobPatch {
        status: Some(JobStatus::Deleted),
        ..Default::default()
    };
    assert!(matches!(
        db.update_job(user, job.id, patch).await,
        Err(CoreError::Validation(_))
    ));

    // Clearing the body through the double option
    let patch = JobPatch {
        body: Some(None),
        ..Default::default()
    };
    let cleared = db.update_job(user, job.id, patch).await.unwrap();
    assert!(cleared.body.is_none());
}

#[tokio::test]
async fn soft_delete_is_idempotent_and_preserves_history() {
    let (db, user) = setup().await;
    let job = db.create_job(user, job_spec("doomed")).await.unwrap();

    let exec_id = db
        .record_execution_start(job.id, TriggeredBy::Cron)
        .await
        .unwrap();
    db.record_execution_end(
        exec_id,
        &ExecutionOutcome {
            status: ExecutionStatus::Success,
            duration_ms: 12,
            response_code: Some(200),
            response_body: Some("ok".into()),
            response_headers: None,
            error_message: None,
        },
    )
    .await
    .unwrap();

    db.delete_job(user, job.id).await.unwrap();
    // Second delete still succeeds
    db.delete_job(user, job.id).await.unwrap();

    assert!(matches!(
        db.get_job(user, job.id).await,
        Err(CoreError::NotFound { .. })
    ));

    // Historical rows remain and the row itself persists unscoped
    assert_eq!(db.count_executions(job.id).await.unwrap(), 1);
    let raw = db.get_job_unscoped(job.id).await.unwrap().unwrap();
    assert_eq!(raw.status, JobStatus::Deleted);
    assert!(raw.next_execution.is_none());
}

#[tokio::test]
async fn finalization_updates_counters_and_next_atomically() {
    let (db, user) = setup().await;
    let job = db.create_job(user, job_spec("counted")).await.unwrap();

    // Success
    let exec_id = db
        .record_execution_start(job.id, TriggeredBy::Cron)
        .await
        .unwrap();
    let running = db.latest_execution(job.id).await.unwrap().unwrap();
    assert_eq!(running.status, ExecutionStatus::Running);

    db.record_execution_end(
        exec_id,
        &ExecutionOutcome {
            status: ExecutionStatus::Success,
            duration_ms: 40,
            response_code: Some(200),
            response_body: Some("ok".into()),
            response_headers: Some(HeaderMap::from([(
                "content-type".to_string(),
                "text/plain".to_string(),
            )])),
            error_message: None,
        },
    )
    .await
    .unwrap();

    let after = db.get_job(user, job.id).await.unwrap();
    assert_eq!(after.success_count, 1);
    assert_eq!(after.failure_count, 0);
    assert!(after.last_execution.unwrap() <= Utc::now());
    assert!(after.next_execution.unwrap() > Utc::now() - Duration::seconds(1));

    let finalized = db.latest_execution(job.id).await.unwrap().unwrap();
    assert_eq!(finalized.status, ExecutionStatus::Success);
    assert_eq!(finalized.response_code, Some(200));
    assert_eq!(
        finalized
            .response_headers
            .unwrap()
            .get("content-type")
            .unwrap(),
        "text/plain"
    );

    // Failure and timeout feed the failure counter
    for status in [ExecutionStatus::Failed, ExecutionStatus::Timeout] {
        let exec_id = db
            .record_execution_start(job.id, TriggeredBy::Cron)
            .await
            .unwrap();
        db.record_execution_end(
            exec_id,
            &ExecutionOutcome {
                status,
                duration_ms: 5,
                response_code: None,
                response_body: None,
                response_headers: None,
                error_message: Some("timeout: no response".into()),
            },
        )
        .await
        .unwrap();
    }

    // Cancelled counts as a failure too
    let exec_id = db
        .record_execution_start(job.id, TriggeredBy::Manual)
        .await
        .unwrap();
    db.record_execution_end(exec_id, &ExecutionOutcome::cancelled(100))
        .await
        .unwrap();

    let after = db.get_job(user, job.id).await.unwrap();
    assert_eq!(after.success_count, 1);
    assert_eq!(after.failure_count, 3);
    // Counter sum equals finalized rows
    assert_eq!(
        after.success_count + after.failure_count,
        db.count_executions(job.id).await.unwrap()
    );
}

#[tokio::test]
async fn finalization_keeps_next_null_for_paused_jobs() {
    let (db, user) = setup().await;
    let job = db.create_job(user, job_spec("paused mid-flight")).await.unwrap();

    let exec_id = db
        .record_execution_start(job.id, TriggeredBy::Cron)
        .await
        .unwrap();
    // Pause lands while the invocation is in flight
    db.toggle_job(user, job.id).await.unwrap();

    db.record_execution_end(
        exec_id,
        &ExecutionOutcome {
            status: ExecutionStatus::Success,
            duration_ms: 5000,
            response_code: Some(200),
            response_body: Some("ok".into()),
            response_headers: None,
            error_message: None,
        },
    )
    .await
    .unwrap();

    let after = db.get_job(user, job.id).await.unwrap();
    assert_eq!(after.status, JobStatus::Paused);
    assert_eq!(after.success_count, 1);
    assert!(after.next_execution.is_none());
}

#[tokio::test]
async fn orphaned_running_rows_are_reclaimed() {
    let (db, user) = setup().await;
    let job = db.create_job(user, job_spec("crashy")).await.unwrap();

    let exec_id = db
        .record_execution_start(job.id, TriggeredBy::Cron)
        .await
        .unwrap();
    // Age the row so it predates the simulated process start
    sqlx::query("UPDATE job_executions SET executed_at = ? WHERE id = ?")
        .bind(Utc::now() - Duration::minutes(10))
        .bind(exec_id)
        .execute(db.pool())
        .await
        .unwrap();

    let orphans = db.list_orphaned_running(Utc::now()).await.unwrap();
    assert_eq!(orphans, vec![exec_id]);

    let reclaimed = db.reclaim_orphaned_running(Utc::now()).await.unwrap();
    assert_eq!(reclaimed, 1);

    let row = db.latest_execution(job.id).await.unwrap().unwrap();
    assert_eq!(row.status, ExecutionStatus::Failed);
    assert_eq!(row.error_message.as_deref(), Some("worker_crashed"));
    assert!(row.response_code.is_none());

    let after = db.get_job(user, job.id).await.unwrap();
    assert_eq!(after.failure_count, 1);
    assert!(after.next_execution.is_some());
    // The invocation never completed, so last_execution stays unset
    assert!(after.last_execution.is_none());

    // A fresh running row from the current process is left alone
    let live_exec = db
        .record_execution_start(job.id, TriggeredBy::Cron)
        .await
        .unwrap();
    let reclaimed = db
        .reclaim_orphaned_running(Utc::now() - Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(reclaimed, 0);
    let row = db.latest_execution(job.id).await.unwrap().unwrap();
    assert_eq!(row.id, live_exec);
    assert_eq!(row.status, ExecutionStatus::Running);
}

#[tokio::test]
async fn pruning_removes_only_expired_rows() {
    let (db, user) = setup().await;
    let job = db.create_job(user, job_spec("prunable")).await.unwrap();

    let old_exec = db
        .record_execution_start(job.id, TriggeredBy::Cron)
        .await
        .unwrap();
    db.record_execution_end(
        old_exec,
        &ExecutionOutcome {
            status: ExecutionStatus::Success,
            duration_ms: 1,
            response_code: Some(200),
            response_body: None,
            response_headers: None,
            error_message: None,
        },
    )
    .await
    .unwrap();
    sqlx::query("UPDATE job_executions SET executed_at = ? WHERE id = ?")
        .bind(Utc::now() - Duration::days(45))
        .bind(old_exec)
        .execute(db.pool())
        .await
        .unwrap();

    let fresh_exec = db
        .record_execution_start(job.id, TriggeredBy::Cron)
        .await
        .unwrap();
    db.record_execution_end(
        fresh_exec,
        &ExecutionOutcome {
            status: ExecutionStatus::Success,
            duration_ms: 1,
            response_code: Some(200),
            response_body: None,
            response_headers: None,
            error_message: None,
        },
    )
    .await
    .unwrap();

    let pruned = db
        .prune_executions(Utc::now() - Duration::days(30))
        .await
        .unwrap();
    assert_eq!(pruned, 1);
    assert_eq!(db.count_executions(job.id).await.unwrap(), 1);
    assert_eq!(
        db.latest_execution(job.id).await.unwrap().unwrap().id,
        fresh_exec
    );
}

#[tokio::test]
async fn execution_listing_is_ownership_scoped() {
    let (db, alice) = setup().await;
    let bob = db
        .create_user(NewUser {
            name: "Bob".into(),
            email: "bob2@example.com".into(),
            password_hash: "hash".into(),
        })
        .await
        .unwrap()
        .id;
    let job = db.create_job(alice, job_spec("listed")).await.unwrap();

    for _ in 0..3 {
        let exec_id = db
            .record_execution_start(job.id, TriggeredBy::Manual)
            .await
            .unwrap();
        db.record_execution_end(
            exec_id,
            &ExecutionOutcome {
                status: ExecutionStatus::Success,
                duration_ms: 1,
                response_code: Some(204),
                response_body: None,
                response_headers: None,
                error_message: None,
            },
        )
        .await
        .unwrap();
    }

    let (rows, total) = db.list_executions(alice, job.id, 1, 2).await.unwrap();
    assert_eq!(total, 3);
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.triggered_by == TriggeredBy::Manual));

    assert!(db.list_executions(bob, job.id, 1, 10).await.is_err());
}

#[tokio::test]
async fn sessions_are_stored_and_purged() {
    let (db, user) = setup().await;

    db.create_session("tok-1", user, Utc::now() + Duration::hours(2))
        .await
        .unwrap();
    db.create_session("tok-expired", user, Utc::now() - Duration::hours(1))
        .await
        .unwrap();

    let purged = db.purge_expired_sessions(Utc::now()).await.unwrap();
    assert_eq!(purged, 1);

    db.delete_session("tok-1").await.unwrap();
    let purged = db.purge_expired_sessions(Utc::now()).await.unwrap();
    assert_eq!(purged, 0);
}
