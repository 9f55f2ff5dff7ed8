//! Database layer
//!
//! SQLite persistence for jobs, executions, users, and sessions. The
//! repository is the authoritative store: the dispatcher's live set is only
//! a mirror of the `status = 'active'` rows here.
//!
//! The module is organized into submodules:
//! - `records` - record types (entities) and operation inputs
//! - `users` - user and session operations
//! - `jobs` - job CRUD with ownership scoping
//! - `executions` - execution rows, atomic finalization, pruning

mod executions;
mod jobs;
mod records;
mod users;

pub use records::*;

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::Path;
use tracing::{error, info};

pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Expose pool for integration test queries
    #[allow(dead_code)]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn new(database_path: &str) -> Result<Self> {
        info!("Database path: {}", database_path);

        if let Some(parent) = Path::new(database_path).parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                error!("Failed to create database directory {:?}: {}", parent, e);
                return Err(e.into());
            }
        }

        let database_url = format!("sqlite:{}?mode=rwc", database_path);
        let pool = match SqlitePool::connect(&database_url).await {
            Ok(pool) => pool,
            Err(e) => {
                error!("Failed to connect to database at {}: {}", database_path, e);
                return Err(e.into());
            }
        };

        let database = Self { pool };
        database.initialize_tables().await?;
        info!("Database initialized");
        Ok(database)
    }

    /// In-memory database for tests. A single connection keeps every query
    /// on the same ephemeral store.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let database = Self { pool };
        database.initialize_tables().await?;
        Ok(database)
    }

    /// Connectivity probe for the liveness endpoint.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    async fn initialize_tables(&self) -> Result<()> {
        let users_sql = r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                account_status TEXT NOT NULL DEFAULT 'active',
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
        "#;
        if let Err(e) = sqlx::query(users_sql).execute(&self.pool).await {
            error!("Failed to create users table: {}", e);
            return Err(e.into());
        }

        let jobs_sql = r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                method TEXT NOT NULL,
                cron_expression TEXT NOT NULL,
                timezone TEXT NOT NULL DEFAULT 'UTC',
                headers TEXT NOT NULL DEFAULT '{}',
                body TEXT,
                description TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                success_count INTEGER NOT NULL DEFAULT 0,
                failure_count INTEGER NOT NULL DEFAULT 0,
                last_execution DATETIME,
                next_execution DATETIME,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
        "#;
        if let Err(e) = sqlx::query(jobs_sql).execute(&self.pool).await {
            error!("Failed to create jobs table: {}", e);
            return Err(e.into());
        }

        let executions_sql = r#"
            CREATE TABLE IF NOT EXISTS job_executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL REFERENCES jobs(id),
                executed_at DATETIME NOT NULL,
                status TEXT NOT NULL,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                response_code INTEGER,
                response_body TEXT,
                response_headers TEXT,
                error_message TEXT,
                triggered_by TEXT NOT NULL DEFAULT 'cron'
            )
        "#;
        if let Err(e) = sqlx::query(executions_sql).execute(&self.pool).await {
            error!("Failed to create job_executions table: {}", e);
            return Err(e.into());
        }

        let sessions_sql = r#"
            CREATE TABLE IF NOT EXISTS user_sessions (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id),
                expires_at DATETIME NOT NULL,
                created_at DATETIME NOT NULL
            )
        "#;
        if let Err(e) = sqlx::query(sessions_sql).execute(&self.pool).await {
            error!("Failed to create user_sessions table: {}", e);
            return Err(e.into());
        }

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_jobs_user_status ON jobs(user_id, status)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_status_next ON jobs(status, next_execution)",
            "CREATE INDEX IF NOT EXISTS idx_executions_job_time ON job_executions(job_id, executed_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_executions_status ON job_executions(status)",
            "CREATE INDEX IF NOT EXISTS idx_sessions_user ON user_sessions(user_id)",
        ];
        for index_sql in indexes {
            if let Err(e) = sqlx::query(index_sql).execute(&self.pool).await {
                error!("Failed to create index: {}", e);
                return Err(e.into());
            }
        }

        Ok(())
    }
}
