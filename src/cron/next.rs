//! Timezone-aware next-occurrence computation
//!
//! Advances a wall-clock candidate field by field (month, then day, hour,
//! minute) in the job's timezone and resolves the first match to UTC.
//! Daylight-saving rules: a candidate inside a spring-forward gap fires at
//! the first valid wall clock after the gap; an ambiguous fall-back time is
//! taken at its first occurrence.

use super::CronExpr;
use crate::constants::cron::SEARCH_HORIZON_DAYS;
use chrono::{
    DateTime, Datelike, Days, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike,
    Utc,
};
use chrono_tz::Tz;

/// Smallest instant strictly after `after` whose wall-clock decomposition in
/// `tz` satisfies `expr`. `None` when no occurrence exists inside the search
/// horizon (grammatically valid but unsatisfiable expressions).
pub fn next_after(expr: &CronExpr, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let local_after = after.with_timezone(&tz).naive_local();
    let horizon = local_after.date().checked_add_days(Days::new(SEARCH_HORIZON_DAYS))?;

    // Start at the next whole minute strictly after `after`
    let mut cand = truncate_to_minute(local_after) + Duration::minutes(1);

    while cand.date() <= horizon {
        if !expr.months.contains(cand.month()) {
            cand = start_of_next_month(cand.date())?;
            continue;
        }
        if !day_matches(expr, cand.date()) {
            cand = cand.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
            continue;
        }
        if !expr.hours.contains(cand.hour()) {
            cand = cand.with_minute(0)? + Duration::hours(1);
            continue;
        }
        if !expr.minutes.contains(cand.minute()) {
            cand += Duration::minutes(1);
            continue;
        }

        match tz.from_local_datetime(&cand) {
            LocalResult::Single(dt) => {
                let instant = dt.with_timezone(&Utc);
                if instant > after {
                    return Some(instant);
                }
            }
            // Fall-back ambiguity resolves to the first occurrence; the
            // second still fires when the reference is already past it
            LocalResult::Ambiguous(first, second) => {
                let first = first.with_timezone(&Utc);
                if first > after {
                    return Some(first);
                }
                let second = second.with_timezone(&Utc);
                if second > after {
                    return Some(second);
                }
            }
            LocalResult::None => {
                // The matching wall clock does not exist; fire at the first
                // valid wall clock after the gap.
                if let Some(instant) = first_valid_after_gap(tz, cand) {
                    if instant > after {
                        return Some(instant);
                    }
                }
            }
        }
        cand += Duration::minutes(1);
    }

    None
}

/// Whether `date` satisfies the day-of-month and day-of-week fields.
/// When both are restricted the standard cron union rule applies.
fn day_matches(expr: &CronExpr, date: NaiveDate) -> bool {
    let dom = expr.days_of_month.contains(date.day());
    let dow = expr
        .days_of_week
        .contains(date.weekday().num_days_from_sunday());

    match (
        expr.days_of_month.is_restricted(),
        expr.days_of_week.is_restricted(),
    ) {
        (true, true) => dom || dow,
        (true, false) => dom,
        (false, true) => dow,
        (false, false) => true,
    }
}

/// First instant at or after a wall clock inside a DST gap. Gaps are at most
/// a few hours long; scan minute by minute until the zone maps the clock.
fn first_valid_after_gap(tz: Tz, gap_start: NaiveDateTime) -> Option<DateTime<Utc>> {
    let mut probe = gap_start;
    for _ in 0..(4 * 60) {
        probe += Duration::minutes(1);
        if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
            return Some(dt.with_timezone(&Utc));
        }
    }
    None
}

fn truncate_to_minute(naive: NaiveDateTime) -> NaiveDateTime {
    naive
        .with_second(0)
        .and_then(|n| n.with_nanosecond(0))
        .unwrap_or(naive)
}

fn start_of_next_month(date: NaiveDate) -> Option<NaiveDateTime> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cron::parse;
    use chrono_tz::Tz;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn next(expr: &str, tz: &str, after: &str) -> DateTime<Utc> {
        let parsed = parse(expr).unwrap();
        let zone: Tz = tz.parse().unwrap();
        next_after(&parsed, zone, utc(after)).unwrap()
    }

    #[test]
    fn every_minute_advances_one_minute() {
        assert_eq!(
            next("* * * * *", "UTC", "2025-06-15T10:30:00Z"),
            utc("2025-06-15T10:31:00Z")
        );
        // Mid-minute reference rounds up to the next whole minute
        assert_eq!(
            next("* * * * *", "UTC", "2025-06-15T10:30:45Z"),
            utc("2025-06-15T10:31:00Z")
        );
    }

    #[test]
    fn result_is_strictly_after_reference() {
        // Reference exactly on a firing instant must yield the next one
        assert_eq!(
            next("0 12 * * *", "UTC", "2025-06-15T12:00:00Z"),
            utc("2025-06-16T12:00:00Z")
        );
    }

    #[test]
    fn carries_across_hour_day_month_year() {
        assert_eq!(
            next("0 0 1 1 *", "UTC", "2025-03-10T08:00:00Z"),
            utc("2026-01-01T00:00:00Z")
        );
        assert_eq!(
            next("30 23 * * *", "UTC", "2025-01-31T23:45:00Z"),
            utc("2025-02-01T23:30:00Z")
        );
    }

    #[test]
    fn respects_timezone_wall_clock() {
        // 09:00 in New York during EDT is 13:00 UTC
        assert_eq!(
            next("0 9 * * *", "America/New_York", "2025-06-15T00:00:00Z"),
            utc("2025-06-15T13:00:00Z")
        );
    }

    #[test]
    fn weekday_field_matches_sunday_as_zero() {
        // 2025-06-15 is a Sunday
        assert_eq!(
            next("0 8 * * 0", "UTC", "2025-06-09T00:00:00Z"),
            utc("2025-06-15T08:00:00Z")
        );
    }

    #[test]
    fn dom_dow_union_when_both_restricted() {
        // Day 15 OR Friday. From Mon 2025-06-09, the first Friday (13th)
        // comes before the 15th.
        assert_eq!(
            next("0 0 15 * 5", "UTC", "2025-06-09T00:00:00Z"),
            utc("2025-06-13T00:00:00Z")
        );
        // And from the 14th, the 15th wins over the next Friday
        assert_eq!(
            next("0 0 15 * 5", "UTC", "2025-06-14T01:00:00Z"),
            utc("2025-06-15T00:00:00Z")
        );
    }

    #[test]
    fn dom_only_when_dow_is_star() {
        assert_eq!(
            next("0 0 15 * *", "UTC", "2025-06-09T00:00:00Z"),
            utc("2025-06-15T00:00:00Z")
        );
    }

    #[test]
    fn spring_forward_gap_fires_at_first_valid_wall_clock() {
        // Europe/Berlin 2025-03-30: 02:00 CET jumps to 03:00 CEST. The
        // 02:30 occurrence on that day does not exist and fires at 03:00
        // CEST, which is 01:00 UTC.
        assert_eq!(
            next("30 2 * * *", "Europe/Berlin", "2025-03-30T00:00:00Z"),
            utc("2025-03-30T01:00:00Z")
        );
    }

    #[test]
    fn fall_back_ambiguity_takes_first_occurrence() {
        // Europe/Berlin 2025-10-26: 03:00 CEST falls back to 02:00 CET, so
        // 02:30 happens twice. The first occurrence is CEST (UTC+2), i.e.
        // 00:30 UTC.
        assert_eq!(
            next("30 2 * * *", "Europe/Berlin", "2025-10-25T23:00:00Z"),
            utc("2025-10-26T00:30:00Z")
        );
    }

    #[test]
    fn fall_back_reference_inside_second_pass_still_fires() {
        // America/New_York 2025-11-02: 01:00-02:00 repeats. With the
        // reference at 01:45 EST (the second pass), a 01:50 schedule fires
        // at 01:50 EST, not the next day.
        assert_eq!(
            next("50 1 * * *", "America/New_York", "2025-11-02T06:45:00Z"),
            utc("2025-11-02T06:50:00Z")
        );
    }

    #[test]
    fn unsatisfiable_expression_returns_none() {
        let expr = parse("0 0 30 2 *").unwrap();
        assert!(next_after(&expr, chrono_tz::UTC, utc("2025-01-01T00:00:00Z")).is_none());
    }

    #[test]
    fn leap_day_found_across_years() {
        assert_eq!(
            next("0 0 29 2 *", "UTC", "2025-03-01T00:00:00Z"),
            utc("2028-02-29T00:00:00Z")
        );
    }

    #[test]
    fn no_instant_skipped_between_reference_and_result() {
        // Sampled check of the minimality property: for a step schedule the
        // gap between successive occurrences is exactly the step.
        let expr = parse("*/15 * * * *").unwrap();
        let mut at = utc("2025-06-15T10:02:00Z");
        let mut fires = Vec::new();
        for _ in 0..5 {
            let n = next_after(&expr, chrono_tz::UTC, at).unwrap();
            fires.push(n);
            at = n;
        }
        assert_eq!(
            fires,
            vec![
                utc("2025-06-15T10:15:00Z"),
                utc("2025-06-15T10:30:00Z"),
                utc("2025-06-15T10:45:00Z"),
                utc("2025-06-15T11:00:00Z"),
                utc("2025-06-15T11:15:00Z"),
            ]
        );
    }
}
