//! Job operations
//!
//! All reads are scoped by owning user except `list_active_jobs`, which the
//! reconciler uses to rebuild the live set. Every write bumps `updated_at`.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;
use tracing::debug;

use super::records::{
    HeaderMap, HttpMethod, Job, JobFilter, JobPatch, JobStatus, NewJob, Page,
};
use super::Database;
use crate::constants::limits;
use crate::cron;
use crate::errors::{CoreError, CoreResult};

impl Database {
    /// Validate a job spec, compute its first firing instant, and persist
    /// the row. Never writes a partial job.
    pub async fn create_job(&self, user_id: i64, spec: NewJob) -> CoreResult<Job> {
        let name = validate_name(&spec.name)?;
        let description = validate_description(spec.description.as_deref())?;
        validate_url(&spec.url)?;
        validate_body(spec.body.as_deref())?;
        validate_headers(&spec.headers)?;

        let now = Utc::now();
        let next_execution = cron::validate_schedule(&spec.cron_expression, &spec.timezone, now)?;
        let headers_json = headers_to_json(&spec.headers)?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                user_id, name, url, method, cron_expression, timezone, headers,
                body, description, status, success_count, failure_count,
                last_execution, next_execution, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', 0, 0, NULL, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(&name)
        .bind(spec.url.trim())
        .bind(spec.method.as_str())
        .bind(spec.cron_expression.trim())
        .bind(&spec.timezone)
        .bind(&headers_json)
        .bind(&spec.body)
        .bind(&description)
        .bind(next_execution)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        let id = result.last_insert_rowid();
        debug!("Created job {} for user {}", id, user_id);
        self.get_job(user_id, id).await
    }

    /// Fetch a job owned by `user_id`. Deleted jobs and foreign owners both
    /// surface as `NotFound`.
    pub async fn get_job(&self, user_id: i64, id: i64) -> CoreResult<Job> {
        let row = sqlx::query(
            "SELECT * FROM jobs WHERE id = ? AND user_id = ? AND status != 'deleted'",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(|r| job_from_row(&r))
            .transpose()?
            .ok_or_else(|| CoreError::not_found("job", id))
    }

    /// Fetch a job by id regardless of owner or status. Dispatcher-internal.
    pub async fn get_job_unscoped(&self, id: i64) -> CoreResult<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| job_from_row(&r)).transpose()
    }

    /// List jobs for a user with filtering, search, and stable pagination.
    /// Returns the page plus the total row count for the filter.
    pub async fn list_jobs(
        &self,
        user_id: i64,
        filter: &JobFilter,
        page: &Page,
    ) -> CoreResult<(Vec<Job>, i64)> {
        let limit = page.limit.clamp(1, limits::PAGE_LIMIT_MAX) as i64;
        let offset = (page.page.max(1) as i64 - 1) * limit;

        let mut where_clause =
            String::from("WHERE user_id = ? AND status != 'deleted'");
        if filter.status.is_some() {
            where_clause.push_str(" AND status = ?");
        }
        if filter.search.is_some() {
            where_clause.push_str(" AND (lower(name) LIKE ? OR lower(url) LIKE ?)");
        }

        // Sort column and direction come from whitelisted enums; id ASC is
        // the tie-breaker for stable pages.
        let select_sql = format!(
            "SELECT * FROM jobs {} ORDER BY {} {}, id ASC LIMIT ? OFFSET ?",
            where_clause,
            page.sort_by.column(),
            page.order.keyword(),
        );
        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);

        let search_pattern = filter
            .search
            .as_ref()
            .map(|s| format!("%{}%", s.to_lowercase()));

        let mut select_query = sqlx::query(&select_sql).bind(user_id);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql).bind(user_id);
        if let Some(status) = filter.status {
            select_query = select_query.bind(status.as_str());
            count_query = count_query.bind(status.as_str());
        }
        if let Some(pattern) = &search_pattern {
            select_query = select_query.bind(pattern).bind(pattern);
            count_query = count_query.bind(pattern).bind(pattern);
        }

        let rows = select_query
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await?;
        let total = count_query.fetch_one(self.pool()).await?;

        let jobs = rows
            .iter()
            .map(job_from_row)
            .collect::<CoreResult<Vec<_>>>()?;
        Ok((jobs, total))
    }

    /// Partial update. Recomputes `next_execution` when the schedule or the
    /// lifecycle status changes.
    pub async fn update_job(&self, user_id: i64, id: i64, patch: JobPatch) -> CoreResult<Job> {
        let existing = self.get_job(user_id, id).await?;

        if patch.status == Some(JobStatus::Deleted) {
            return Err(CoreError::validation(
                "jobs are deleted through the delete operation, not status updates",
            ));
        }

        let name = match &patch.name {
            Some(n) => validate_name(n)?,
            None => existing.name.clone(),
        };
        let url = match &patch.url {
            Some(u) => {
                validate_url(u)?;
                u.trim().to_string()
            }
            None => existing.url.clone(),
        };
        let method = patch.method.unwrap_or(existing.method);
        let cron_expression = patch
            .cron_expression
            .as_deref()
            .map(str::trim)
            .unwrap_or(existing.cron_expression.as_str())
            .to_string();
        // An update that carries a timezone uses it; otherwise the existing
        // one is retained. The recompute below always pairs the effective
        // cron with the effective timezone.
        let timezone = patch
            .timezone
            .clone()
            .unwrap_or_else(|| existing.timezone.clone());
        let headers = patch.headers.clone().unwrap_or_else(|| existing.headers.clone());
        validate_headers(&headers)?;
        let body = match &patch.body {
            Some(b) => b.clone(),
            None => existing.body.clone(),
        };
        validate_body(body.as_deref())?;
        let description = match &patch.description {
            Some(d) => validate_description(d.as_deref())?,
            None => existing.description.clone(),
        };
        let status = patch.status.unwrap_or(existing.status);

        let now = Utc::now();
        let schedule_changed = cron_expression != existing.cron_expression
            || timezone != existing.timezone;

        let next_execution = match status {
            JobStatus::Paused | JobStatus::Deleted => None,
            JobStatus::Active => {
                if schedule_changed || existing.status != JobStatus::Active {
                    Some(cron::validate_schedule(&cron_expression, &timezone, now)?)
                } else {
                    // Schedule untouched and still active; validate anyway so
                    // a bad stored pair can never survive an update.
                    cron::validate_schedule(&cron_expression, &timezone, now)?;
                    existing.next_execution
                }
            }
        };

        let headers_json = headers_to_json(&headers)?;
        sqlx::query(
            r#"
            UPDATE jobs SET
                name = ?, url = ?, method = ?, cron_expression = ?, timezone = ?,
                headers = ?, body = ?, description = ?, status = ?,
                next_execution = ?, updated_at = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(&name)
        .bind(&url)
        .bind(method.as_str())
        .bind(&cron_expression)
        .bind(&timezone)
        .bind(&headers_json)
        .bind(&body)
        .bind(&description)
        .bind(status.as_str())
        .bind(next_execution)
        .bind(now)
        .bind(id)
        .bind(user_id)
        .execute(self.pool())
        .await?;

        self.get_job(user_id, id).await
    }

    /// Soft delete. Idempotent: deleting an already-deleted job succeeds;
    /// a foreign or unknown id is `NotFound`.
    pub async fn delete_job(&self, user_id: i64, id: i64) -> CoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = 'deleted', next_execution = NULL, updated_at = ?
            WHERE id = ? AND user_id = ? AND status != 'deleted'
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .bind(user_id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() > 0 {
            debug!("Soft-deleted job {}", id);
            return Ok(());
        }

        // Distinguish "already deleted" (ok) from "not yours / missing"
        let owned: Option<i64> =
            sqlx::query_scalar("SELECT id FROM jobs WHERE id = ? AND user_id = ?")
                .bind(id)
                .bind(user_id)
                .fetch_optional(self.pool())
                .await?;
        match owned {
            Some(_) => Ok(()),
            None => Err(CoreError::not_found("job", id)),
        }
    }

    /// Flip a job between active and paused, maintaining the
    /// status/next-execution coupling.
    pub async fn toggle_job(&self, user_id: i64, id: i64) -> CoreResult<Job> {
        let existing = self.get_job(user_id, id).await?;
        let now = Utc::now();

        let (new_status, next_execution) = match existing.status {
            JobStatus::Active => (JobStatus::Paused, None),
            JobStatus::Paused => {
                let next =
                    cron::validate_schedule(&existing.cron_expression, &existing.timezone, now)?;
                (JobStatus::Active, Some(next))
            }
            // get_job filters deleted rows
            JobStatus::Deleted => return Err(CoreError::not_found("job", id)),
        };

        sqlx::query(
            "UPDATE jobs SET status = ?, next_execution = ?, updated_at = ? WHERE id = ? AND user_id = ?",
        )
        .bind(new_status.as_str())
        .bind(next_execution)
        .bind(now)
        .bind(id)
        .bind(user_id)
        .execute(self.pool())
        .await?;

        debug!("Toggled job {} to {}", id, new_status);
        self.get_job(user_id, id).await
    }

    /// Global listing of active jobs. Reconciler-only; no user scope.
    pub async fn list_active_jobs(&self) -> CoreResult<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE status = 'active' ORDER BY id ASC")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(job_from_row).collect()
    }
}

// ============================================================================
// Validation and row mapping
// ============================================================================

fn validate_name(name: &str) -> CoreResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CoreError::validation("job name must not be empty"));
    }
    if trimmed.chars().count() > limits::JOB_NAME_MAX {
        return Err(CoreError::validation(format!(
            "job name exceeds {} characters",
            limits::JOB_NAME_MAX
        )));
    }
    Ok(trimmed.to_string())
}

fn validate_description(description: Option<&str>) -> CoreResult<Option<String>> {
    match description {
        None => Ok(None),
        Some(d) => {
            if d.chars().count() > limits::JOB_DESCRIPTION_MAX {
                return Err(CoreError::validation(format!(
                    "description exceeds {} characters",
                    limits::JOB_DESCRIPTION_MAX
                )));
            }
            Ok(Some(d.to_string()))
        }
    }
}

fn validate_url(url: &str) -> CoreResult<()> {
    let parsed = reqwest::Url::parse(url.trim())
        .map_err(|e| CoreError::validation(format!("invalid URL: {}", e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(CoreError::validation(format!(
            "URL scheme must be http or https, got '{}'",
            other
        ))),
    }
}

fn validate_body(body: Option<&str>) -> CoreResult<()> {
    if let Some(b) = body {
        if b.chars().count() > limits::JOB_BODY_MAX_CHARS {
            return Err(CoreError::validation(format!(
                "request body exceeds {} characters",
                limits::JOB_BODY_MAX_CHARS
            )));
        }
    }
    Ok(())
}

fn validate_headers(headers: &HeaderMap) -> CoreResult<()> {
    for (name, value) in headers {
        reqwest::header::HeaderName::try_from(name.as_str())
            .map_err(|_| CoreError::validation(format!("invalid header name '{}'", name)))?;
        reqwest::header::HeaderValue::try_from(value.as_str())
            .map_err(|_| CoreError::validation(format!("invalid value for header '{}'", name)))?;
    }
    Ok(())
}

fn headers_to_json(headers: &HeaderMap) -> CoreResult<String> {
    serde_json::to_string(headers)
        .map_err(|e| CoreError::internal(format!("failed to encode headers: {}", e)))
}

pub(super) fn job_from_row(row: &SqliteRow) -> CoreResult<Job> {
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str).map_err(CoreError::internal)?;
    let method_str: String = row.try_get("method")?;
    let method = HttpMethod::from_str(&method_str).map_err(CoreError::internal)?;
    let headers_json: String = row.try_get("headers")?;
    let headers: HeaderMap = serde_json::from_str(&headers_json)
        .map_err(|e| CoreError::internal(format!("corrupt headers column: {}", e)))?;

    Ok(Job {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        method,
        cron_expression: row.try_get("cron_expression")?,
        timezone: row.try_get("timezone")?,
        headers,
        body: row.try_get("body")?,
        description: row.try_get("description")?,
        status,
        success_count: row.try_get("success_count")?,
        failure_count: row.try_get("failure_count")?,
        last_execution: row.try_get("last_execution")?,
        next_execution: row.try_get("next_execution")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
