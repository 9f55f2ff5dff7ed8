//! Human-readable schedule descriptions
//!
//! Display-only: a table of common patterns for exact matches, otherwise a
//! deterministic generated phrase. Never consulted for scheduling.

use super::CronExpr;

const DAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Short English phrase for a parsed expression, e.g.
/// `0 9 * * 1-5` -> "Weekdays at 9:00 AM".
pub fn describe(expr: &CronExpr) -> String {
    if let Some(exact) = exact_match(expr.source()) {
        return exact.to_string();
    }

    let fields: Vec<&str> = expr.source().split(' ').collect();

    // Interval patterns: "*/n * * * *" and "0 */n * * *"
    if let Some(n) = step_of(fields[0]) {
        if fields[1..] == ["*", "*", "*", "*"] {
            return format!("Every {} minutes", n);
        }
    }
    if fields[0] == "0" {
        if let Some(n) = step_of(fields[1]) {
            if fields[2..] == ["*", "*", "*"] {
                return format!("Every {} hours", n);
            }
        }
    }

    generate(expr)
}

fn exact_match(source: &str) -> Option<&'static str> {
    let description = match source {
        "* * * * *" => "Every minute",
        "0 * * * *" => "Every hour",
        "0 0 * * *" => "Daily at midnight",
        "0 12 * * *" => "Daily at noon",
        "0 9 * * 1-5" => "Weekdays at 9:00 AM",
        "0 0 * * 0" => "Sundays at midnight",
        "0 0 1 * *" => "Monthly on the 1st at midnight",
        "0 0 1 1 *" => "Yearly on January 1st at midnight",
        _ => return None,
    };
    Some(description)
}

/// Deterministic fallback: "At minute M [past hour H] [on day D]
/// [in MONTH] [on DAYNAMES]", collapsing to a clock time when both minute
/// and hour are single values.
fn generate(expr: &CronExpr) -> String {
    let minutes = expr.minutes.values(0, 59);
    let hours = expr.hours.values(0, 23);
    let days = expr.days_of_month.values(1, 31);
    let months = expr.months.values(1, 12);
    let weekdays = expr.days_of_week.values(0, 6);

    let mut phrase = match (single(expr, &minutes), single_hours(expr, &hours)) {
        (Some(m), Some(h)) => format!("At {}", clock(h, m)),
        _ => {
            let mut p = if expr.minutes.is_restricted() {
                format!("At minute {}", join_numbers(&minutes))
            } else {
                "Every minute".to_string()
            };
            if expr.hours.is_restricted() {
                p.push_str(&format!(" past hour {}", join_numbers(&hours)));
            }
            p
        }
    };

    if expr.days_of_month.is_restricted() {
        phrase.push_str(&format!(" on day {}", join_numbers(&days)));
    }
    if expr.months.is_restricted() {
        let names: Vec<&str> = months
            .iter()
            .map(|m| MONTH_NAMES[(*m - 1) as usize])
            .collect();
        phrase.push_str(&format!(" in {}", join_words(&names)));
    }
    if expr.days_of_week.is_restricted() {
        let names: Vec<&str> = weekdays.iter().map(|d| DAY_NAMES[*d as usize]).collect();
        phrase.push_str(&format!(" on {}", join_words(&names)));
    }

    phrase
}

fn step_of(field: &str) -> Option<u32> {
    field.strip_prefix("*/").and_then(|n| n.parse().ok())
}

fn single(expr: &CronExpr, minutes: &[u32]) -> Option<u32> {
    if expr.minutes.is_restricted() && minutes.len() == 1 {
        Some(minutes[0])
    } else {
        None
    }
}

fn single_hours(expr: &CronExpr, hours: &[u32]) -> Option<u32> {
    if expr.hours.is_restricted() && hours.len() == 1 {
        Some(hours[0])
    } else {
        None
    }
}

fn clock(hour: u32, minute: u32) -> String {
    let (h12, meridiem) = match hour {
        0 => (12, "AM"),
        1..=11 => (hour, "AM"),
        12 => (12, "PM"),
        _ => (hour - 12, "PM"),
    };
    format!("{}:{:02} {}", h12, minute, meridiem)
}

fn join_numbers(values: &[u32]) -> String {
    let strings: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    strings.join(", ")
}

fn join_words(words: &[&str]) -> String {
    match words.len() {
        0 => String::new(),
        1 => words[0].to_string(),
        2 => format!("{} and {}", words[0], words[1]),
        _ => format!(
            "{} and {}",
            words[..words.len() - 1].join(", "),
            words[words.len() - 1]
        ),
    }
}
