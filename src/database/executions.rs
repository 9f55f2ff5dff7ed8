//! Execution row operations
//!
//! An execution row is created in `running` when a firing begins and
//! finalized exactly once. Finalization updates the row, the parent job's
//! counters, `last_execution`, and `next_execution` in a single transaction
//! so observers never see a half-written outcome.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, warn};

use super::records::{
    ExecutionOutcome, ExecutionStatus, HeaderMap, JobExecution, JobStatus, TriggeredBy,
};
use super::Database;
use crate::cron;
use crate::errors::{CoreError, CoreResult};

impl Database {
    /// Insert a `running` execution row and return its id.
    pub async fn record_execution_start(
        &self,
        job_id: i64,
        triggered_by: TriggeredBy,
    ) -> CoreResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_executions (job_id, executed_at, status, duration_ms, triggered_by)
            VALUES (?, ?, 'running', 0, ?)
            "#,
        )
        .bind(job_id)
        .bind(Utc::now())
        .bind(triggered_by.as_str())
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Finalize an execution row and advance the parent job in one atomic
    /// step: outcome fields on the row, success or failure counter,
    /// `last_execution`, and (while the job is still active) the next
    /// firing instant.
    pub async fn record_execution_end(
        &self,
        exec_id: i64,
        outcome: &ExecutionOutcome,
    ) -> CoreResult<()> {
        let now = Utc::now();
        let mut tx = self.pool().begin().await?;

        let job_id: Option<i64> =
            sqlx::query_scalar("SELECT job_id FROM job_executions WHERE id = ?")
                .bind(exec_id)
                .fetch_optional(&mut *tx)
                .await?;
        let job_id = job_id.ok_or_else(|| CoreError::not_found("execution", exec_id))?;

        let headers_json = outcome
            .response_headers
            .as_ref()
            .map(|h| serde_json::to_string(h))
            .transpose()
            .map_err(|e| CoreError::internal(format!("failed to encode response headers: {}", e)))?;

        sqlx::query(
            r#"
            UPDATE job_executions SET
                status = ?, duration_ms = ?, response_code = ?,
                response_body = ?, response_headers = ?, error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(outcome.status.as_str())
        .bind(outcome.duration_ms)
        .bind(outcome.response_code)
        .bind(&outcome.response_body)
        .bind(&headers_json)
        .bind(&outcome.error_message)
        .bind(exec_id)
        .execute(&mut *tx)
        .await?;

        let job_row = sqlx::query("SELECT status, cron_expression, timezone FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_one(&mut *tx)
            .await?;
        let status_str: String = job_row.try_get("status")?;
        let job_status = JobStatus::from_str(&status_str).map_err(CoreError::internal)?;
        let cron_expression: String = job_row.try_get("cron_expression")?;
        let timezone: String = job_row.try_get("timezone")?;

        // Finalization is the authoritative writer of next_execution, but a
        // job paused or deleted mid-flight keeps it null.
        let mut schedule_error = None;
        let next_execution = match job_status {
            JobStatus::Active => {
                match cron::validate_schedule(&cron_expression, &timezone, now) {
                    Ok(next) => Some(next),
                    Err(e) => {
                        // The stored expression should always evaluate; a
                        // failure here is an invariant breach, reported after
                        // the outcome itself is safely committed.
                        schedule_error = Some(e);
                        None
                    }
                }
            }
            JobStatus::Paused | JobStatus::Deleted => None,
        };

        let counter_sql = if outcome.status.is_success() {
            r#"
            UPDATE jobs SET success_count = success_count + 1,
                last_execution = ?, next_execution = ?, updated_at = ?
            WHERE id = ?
            "#
        } else {
            r#"
            UPDATE jobs SET failure_count = failure_count + 1,
                last_execution = ?, next_execution = ?, updated_at = ?
            WHERE id = ?
            "#
        };
        sqlx::query(counter_sql)
            .bind(now)
            .bind(next_execution)
            .bind(now)
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(
            "Finalized execution {} for job {} as {}",
            exec_id, job_id, outcome.status
        );

        match schedule_error {
            Some(e) => Err(CoreError::internal(format!(
                "job {} schedule stopped evaluating after finalization: {}",
                job_id, e
            ))),
            None => Ok(()),
        }
    }

    /// Execution rows stuck in `running` from before `process_start`.
    pub async fn list_orphaned_running(
        &self,
        process_start: DateTime<Utc>,
    ) -> CoreResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM job_executions WHERE status = 'running' AND executed_at < ? ORDER BY id ASC",
        )
        .bind(process_start)
        .fetch_all(self.pool())
        .await?;
        Ok(ids)
    }

    /// Reclassify orphaned `running` rows as `failed` / `worker_crashed`,
    /// charging the parent job's failure counter and recomputing its next
    /// firing if it is still active. `last_execution` is left untouched:
    /// the invocation never completed.
    pub async fn reclaim_orphaned_running(
        &self,
        process_start: DateTime<Utc>,
    ) -> CoreResult<u64> {
        let ids = self.list_orphaned_running(process_start).await?;
        let mut reclaimed = 0u64;
        let now = Utc::now();

        for exec_id in ids {
            let mut tx = self.pool().begin().await?;

            let job_id: i64 = sqlx::query_scalar("SELECT job_id FROM job_executions WHERE id = ?")
                .bind(exec_id)
                .fetch_one(&mut *tx)
                .await?;

            sqlx::query(
                r#"
                UPDATE job_executions SET status = 'failed', error_message = 'worker_crashed'
                WHERE id = ? AND status = 'running'
                "#,
            )
            .bind(exec_id)
            .execute(&mut *tx)
            .await?;

            let job_row =
                sqlx::query("SELECT status, cron_expression, timezone FROM jobs WHERE id = ?")
                    .bind(job_id)
                    .fetch_one(&mut *tx)
                    .await?;
            let status_str: String = job_row.try_get("status")?;
            let job_status = JobStatus::from_str(&status_str).map_err(CoreError::internal)?;
            let cron_expression: String = job_row.try_get("cron_expression")?;
            let timezone: String = job_row.try_get("timezone")?;

            let next_execution = if job_status == JobStatus::Active {
                cron::validate_schedule(&cron_expression, &timezone, now).ok()
            } else {
                None
            };

            sqlx::query(
                "UPDATE jobs SET failure_count = failure_count + 1, next_execution = ?, updated_at = ? WHERE id = ?",
            )
            .bind(next_execution)
            .bind(now)
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            warn!(
                "Reclaimed orphaned execution {} (job {}) as failed/worker_crashed",
                exec_id, job_id
            );
            reclaimed += 1;
        }

        Ok(reclaimed)
    }

    /// Delete execution rows older than the cutoff. Returns the count.
    pub async fn prune_executions(&self, older_than: DateTime<Utc>) -> CoreResult<u64> {
        let result = sqlx::query("DELETE FROM job_executions WHERE executed_at < ?")
            .bind(older_than)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    /// Execution history for a job, newest first, ownership enforced through
    /// the parent job.
    pub async fn list_executions(
        &self,
        user_id: i64,
        job_id: i64,
        page: u32,
        limit: u32,
    ) -> CoreResult<(Vec<JobExecution>, i64)> {
        // Ownership check shares the job read path
        self.get_job(user_id, job_id).await?;

        let limit = limit.clamp(1, crate::constants::limits::PAGE_LIMIT_MAX) as i64;
        let offset = (page.max(1) as i64 - 1) * limit;

        let rows = sqlx::query(
            r#"
            SELECT * FROM job_executions WHERE job_id = ?
            ORDER BY executed_at DESC, id DESC LIMIT ? OFFSET ?
            "#,
        )
        .bind(job_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM job_executions WHERE job_id = ?")
                .bind(job_id)
                .fetch_one(self.pool())
                .await?;

        let executions = rows
            .iter()
            .map(execution_from_row)
            .collect::<CoreResult<Vec<_>>>()?;
        Ok((executions, total))
    }

    /// Most recent execution row for a job, if any. Unscoped; used by the
    /// dispatcher and tests.
    pub async fn latest_execution(&self, job_id: i64) -> CoreResult<Option<JobExecution>> {
        let row = sqlx::query(
            "SELECT * FROM job_executions WHERE job_id = ? ORDER BY executed_at DESC, id DESC LIMIT 1",
        )
        .bind(job_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| execution_from_row(&r)).transpose()
    }

    /// Number of finalized execution rows for a job, by status.
    pub async fn count_executions(&self, job_id: i64) -> CoreResult<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM job_executions WHERE job_id = ?")
                .bind(job_id)
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }
}

fn execution_from_row(row: &SqliteRow) -> CoreResult<JobExecution> {
    let status_str: String = row.try_get("status")?;
    let status = ExecutionStatus::from_str(&status_str).map_err(CoreError::internal)?;
    let trigger_str: String = row.try_get("triggered_by")?;
    let triggered_by = TriggeredBy::from_str(&trigger_str).map_err(CoreError::internal)?;
    let headers_json: Option<String> = row.try_get("response_headers")?;
    let response_headers: Option<HeaderMap> = headers_json
        .map(|j| serde_json::from_str(&j))
        .transpose()
        .map_err(|e| CoreError::internal(format!("corrupt response headers column: {}", e)))?;

    Ok(JobExecution {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        executed_at: row.try_get("executed_at")?,
        status,
        duration_ms: row.try_get("duration_ms")?,
        response_code: row.try_get("response_code")?,
        response_body: row.try_get("response_body")?,
        response_headers,
        error_message: row.try_get("error_message")?,
        triggered_by,
    })
}
