//! User and session operations
//!
//! The repository owns these tables for the auth collaborator; the scheduler
//! core only needs users for job ownership.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;
use tracing::debug;

use super::records::{AccountStatus, NewUser, User, UserSession};
use super::Database;
use crate::errors::{CoreError, CoreResult};

impl Database {
    pub async fn create_user(&self, new_user: NewUser) -> CoreResult<User> {
        let email = new_user.email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(CoreError::validation("email address is required"));
        }
        let name = new_user.name.trim().to_string();
        if name.is_empty() {
            return Err(CoreError::validation("user name is required"));
        }

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO users (name, email, password_hash, account_status, created_at, updated_at)
            VALUES (?, ?, ?, 'active', ?, ?)
            "#,
        )
        .bind(&name)
        .bind(&email)
        .bind(&new_user.password_hash)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| match CoreError::from(e) {
            CoreError::Conflict(_) => {
                CoreError::Conflict(format!("email '{}' is already registered", email))
            }
            other => other,
        })?;

        let id = result.last_insert_rowid();
        debug!("Created user {} ({})", id, email);
        self.get_user(id).await
    }

    pub async fn get_user(&self, id: i64) -> CoreResult<User> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        row.map(|r| user_from_row(&r))
            .transpose()?
            .ok_or_else(|| CoreError::not_found("user", id))
    }

    pub async fn find_user_by_email(&self, email: &str) -> CoreResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE email = ?")
            .bind(email.trim().to_lowercase())
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| user_from_row(&r)).transpose()
    }

    pub async fn create_session(
        &self,
        id: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> CoreResult<UserSession> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO user_sessions (id, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(user_id)
        .bind(expires_at)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(UserSession {
            id: id.to_string(),
            user_id,
            expires_at,
            created_at: now,
        })
    }

    pub async fn delete_session(&self, id: &str) -> CoreResult<()> {
        sqlx::query("DELETE FROM user_sessions WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> CoreResult<u64> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
            .bind(now)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

fn user_from_row(row: &SqliteRow) -> CoreResult<User> {
    let status_str: String = row.try_get("account_status")?;
    let account_status = AccountStatus::from_str(&status_str)
        .map_err(CoreError::internal)?;

    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        account_status,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
