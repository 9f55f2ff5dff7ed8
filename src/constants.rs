//! Application-wide constants for limits, timeouts, and intervals
//!
//! Central repository for magic numbers shared across modules.

#![allow(dead_code)] // Some constants are defined for future use

use std::time::Duration;

/// Field limits enforced by job validation
pub mod limits {
    /// Maximum length of a job name (after trimming)
    pub const JOB_NAME_MAX: usize = 100;

    /// Maximum length of a job description
    pub const JOB_DESCRIPTION_MAX: usize = 500;

    /// Maximum length of a request body template, in characters
    pub const JOB_BODY_MAX_CHARS: usize = 10_000;

    /// Maximum page size for job and execution listings
    pub const PAGE_LIMIT_MAX: u32 = 100;

    /// Default page size when the caller does not specify one
    pub const PAGE_LIMIT_DEFAULT: u32 = 20;
}

/// Dispatcher and shutdown constants
pub mod scheduling {
    use super::Duration;

    /// Backoff schedule for retrying an execution finalization that hit a
    /// database conflict. The HTTP call is never repeated, only the write.
    pub const FINALIZE_RETRY_BACKOFF_MS: [u64; 3] = [50, 200, 500];

    /// Hard cap on the shutdown drain deadline, whatever the config says
    pub const SHUTDOWN_DEADLINE_CAP: Duration = Duration::from_secs(30);

    /// Grace period after hard-cancelling in-flight invocations, so their
    /// `cancelled` rows can reach the database
    pub const HARD_CANCEL_GRACE: Duration = Duration::from_secs(5);

    /// Poll step while waiting for in-flight firings to drain
    pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

    /// How long a job task waits before retrying after a transient
    /// database read failure
    pub const JOB_RELOAD_BACKOFF: Duration = Duration::from_secs(5);
}

/// HTTP invoker constants
pub mod http {
    use super::Duration;

    /// Timeout for establishing outbound connections
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Maximum number of redirects followed per invocation
    pub const MAX_REDIRECTS: usize = 5;
}

/// Cron evaluation constants
pub mod cron {
    /// Next-fire searches give up past this horizon. A grammatically valid
    /// expression with no occurrence inside the window (e.g. `0 0 30 2 *`)
    /// is rejected at validation time instead of scheduling nothing.
    pub const SEARCH_HORIZON_DAYS: u64 = 366 * 5;
}
