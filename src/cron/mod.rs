//! Cron expression evaluation
//!
//! Parses the 5-field grammar (minute hour day-of-month month day-of-week),
//! computes the next firing instant in an IANA timezone, and produces a
//! short human-readable description for display.
//!
//! The module is organized into submodules:
//! - `parser` - grammar validation into per-field value sets
//! - `next` - timezone-aware next-occurrence computation
//! - `describe` - human-readable schedule descriptions

mod describe;
mod next;
mod parser;

pub use describe::describe;
pub use next::next_after;
pub use parser::parse;

use crate::errors::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::str::FromStr;

/// A parsed cron expression: one value set per field.
///
/// Field semantics follow standard cron. When both day-of-month and
/// day-of-week are restricted (neither written as `*`), a day matches if
/// either field matches (union).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    pub(crate) minutes: FieldSet,
    pub(crate) hours: FieldSet,
    pub(crate) days_of_month: FieldSet,
    pub(crate) months: FieldSet,
    pub(crate) days_of_week: FieldSet,
    source: String,
}

impl CronExpr {
    /// The expression normalized to single spaces between fields.
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Set of accepted values for one cron field, stored as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FieldSet {
    bits: u64,
    /// False iff the field was written as a bare `*`. Drives the
    /// day-of-month / day-of-week union rule.
    restricted: bool,
}

impl FieldSet {
    pub(crate) fn new(bits: u64, restricted: bool) -> Self {
        Self { bits, restricted }
    }

    pub(crate) fn contains(&self, value: u32) -> bool {
        value < 64 && self.bits & (1u64 << value) != 0
    }

    pub(crate) fn is_restricted(&self) -> bool {
        self.restricted
    }

    /// Values present in the set, ascending.
    pub(crate) fn values(&self, min: u32, max: u32) -> Vec<u32> {
        (min..=max).filter(|v| self.contains(*v)).collect()
    }
}

/// Resolve an IANA timezone name, rejecting unknown zones.
pub fn parse_timezone(name: &str) -> CoreResult<Tz> {
    Tz::from_str(name)
        .map_err(|_| CoreError::validation(format!("unknown timezone '{}'", name)))
}

/// Validate an expression/timezone pair and prove it has a future
/// occurrence. Used by job validation so a job can never be stored with a
/// schedule that fires nothing.
pub fn validate_schedule(
    expression: &str,
    timezone: &str,
    now: DateTime<Utc>,
) -> CoreResult<DateTime<Utc>> {
    let expr = parse(expression)?;
    let tz = parse_timezone(timezone)?;
    next_after(&expr, tz, now).ok_or_else(|| {
        CoreError::validation(format!(
            "cron expression '{}' never fires (no occurrence within the search window)",
            expression
        ))
    })
}
