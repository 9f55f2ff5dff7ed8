//! Core error taxonomy
//!
//! The small, stable set of error kinds the API layer maps to user-visible
//! status codes. Invocation failures are not errors: the invoker always
//! returns a structured outcome that is recorded as an execution row.

use std::fmt;

pub type CoreResult<T> = Result<T, CoreError>;

/// Error kinds surfaced by the repository, evaluator, and dispatcher
#[derive(Debug)]
pub enum CoreError {
    /// Input rejected by validation (bad cron expression, field limits,
    /// malformed URL). Surfaced to the caller verbatim, never retried.
    Validation(String),

    /// Ownership or deletion check failed
    NotFound { entity: &'static str, id: i64 },

    /// Uniqueness violation (user email)
    Conflict(String),

    /// Repository transaction conflict; retried internally a bounded
    /// number of times before being surfaced
    Concurrency(String),

    /// Evaluator or dispatcher invariant violation. Logged at error level;
    /// the affected job is disarmed and left in place for inspection.
    SchedulerInternal(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        CoreError::NotFound { entity, id }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CoreError::SchedulerInternal(msg.into())
    }

    pub fn is_concurrency(&self) -> bool {
        matches!(self, CoreError::Concurrency(_))
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Validation(msg) => write!(f, "Validation error: {}", msg),
            CoreError::NotFound { entity, id } => write!(f, "{} {} not found", entity, id),
            CoreError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            CoreError::Concurrency(msg) => write!(f, "Transaction conflict: {}", msg),
            CoreError::SchedulerInternal(msg) => write!(f, "Scheduler internal error: {}", msg),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    return CoreError::Conflict(db_err.to_string());
                }
                // SQLite reports write contention as BUSY or LOCKED
                let msg = db_err.message().to_ascii_lowercase();
                if msg.contains("locked") || msg.contains("busy") {
                    return CoreError::Concurrency(db_err.to_string());
                }
                CoreError::SchedulerInternal(err.to_string())
            }
            sqlx::Error::PoolTimedOut => CoreError::Concurrency(err.to_string()),
            _ => CoreError::SchedulerInternal(err.to_string()),
        }
    }
}
