//! 5-field cron grammar parser
//!
//! Accepted per field: `*`, a single integer, a range `a-b` (a < b), a step
//! `*/n` or `a-b/n` (1 <= n <= field max), or a comma-separated list of any
//! of those. Day-of-week uses 0..6 with Sunday = 0; name aliases are not
//! supported.

use super::{CronExpr, FieldSet};
use crate::errors::{CoreError, CoreResult};

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
}

const FIELDS: [FieldSpec; 5] = [
    FieldSpec { name: "minute", min: 0, max: 59 },
    FieldSpec { name: "hour", min: 0, max: 23 },
    FieldSpec { name: "day-of-month", min: 1, max: 31 },
    FieldSpec { name: "month", min: 1, max: 12 },
    FieldSpec { name: "day-of-week", min: 0, max: 6 },
];

/// Parse and validate a cron expression.
pub fn parse(expression: &str) -> CoreResult<CronExpr> {
    let parts: Vec<&str> = expression.split_whitespace().collect();
    if parts.len() != 5 {
        return Err(CoreError::validation(format!(
            "cron expression must have exactly 5 fields (minute hour day month day-of-week), got {}: '{}'",
            parts.len(),
            expression
        )));
    }

    let mut sets = Vec::with_capacity(5);
    for (part, spec) in parts.iter().zip(FIELDS.iter()) {
        sets.push(parse_field(part, spec)?);
    }

    Ok(CronExpr {
        minutes: sets[0],
        hours: sets[1],
        days_of_month: sets[2],
        months: sets[3],
        days_of_week: sets[4],
        source: parts.join(" "),
    })
}

fn parse_field(field: &str, spec: &FieldSpec) -> CoreResult<FieldSet> {
    if field == "*" {
        return Ok(FieldSet::new(full_mask(spec), false));
    }

    let mut bits = 0u64;
    for item in field.split(',') {
        if item.is_empty() {
            return Err(CoreError::validation(format!(
                "empty list item in {} field '{}'",
                spec.name, field
            )));
        }
        bits |= parse_item(item, spec)?;
    }

    Ok(FieldSet::new(bits, true))
}

fn parse_item(item: &str, spec: &FieldSpec) -> CoreResult<u64> {
    if item == "*" {
        return Ok(full_mask(spec));
    }

    // Step form: */n or a-b/n
    if let Some((base, step_str)) = item.split_once('/') {
        let step = parse_value(step_str, spec, "step")?;
        if step < 1 {
            return Err(CoreError::validation(format!(
                "{} step must be at least 1, got '{}'",
                spec.name, item
            )));
        }
        if step > spec.max {
            return Err(CoreError::validation(format!(
                "{} step {} exceeds field maximum {}",
                spec.name, step, spec.max
            )));
        }

        let (start, end) = if base == "*" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = base.split_once('-') {
            parse_range(a, b, spec)?
        } else {
            return Err(CoreError::validation(format!(
                "step base must be '*' or a range in {} field, got '{}'",
                spec.name, item
            )));
        };

        let mut bits = 0u64;
        let mut v = start;
        while v <= end {
            bits |= 1u64 << v;
            v += step;
        }
        return Ok(bits);
    }

    // Range form: a-b
    if let Some((a, b)) = item.split_once('-') {
        let (start, end) = parse_range(a, b, spec)?;
        let mut bits = 0u64;
        for v in start..=end {
            bits |= 1u64 << v;
        }
        return Ok(bits);
    }

    // Single value
    let v = parse_value(item, spec, "value")?;
    check_in_range(v, spec)?;
    Ok(1u64 << v)
}

fn parse_range(a: &str, b: &str, spec: &FieldSpec) -> CoreResult<(u32, u32)> {
    let start = parse_value(a, spec, "range start")?;
    let end = parse_value(b, spec, "range end")?;
    check_in_range(start, spec)?;
    check_in_range(end, spec)?;
    if start >= end {
        return Err(CoreError::validation(format!(
            "{} range start must be less than end, got {}-{}",
            spec.name, start, end
        )));
    }
    Ok((start, end))
}

fn parse_value(text: &str, spec: &FieldSpec, what: &str) -> CoreResult<u32> {
    text.parse::<u32>().map_err(|_| {
        CoreError::validation(format!(
            "invalid {} {} '{}' (names and symbols are not supported)",
            spec.name, what, text
        ))
    })
}

fn check_in_range(value: u32, spec: &FieldSpec) -> CoreResult<()> {
    if value < spec.min || value > spec.max {
        return Err(CoreError::validation(format!(
            "{} value {} is outside valid range {}-{}",
            spec.name, value, spec.min, spec.max
        )));
    }
    Ok(())
}

fn full_mask(spec: &FieldSpec) -> u64 {
    let mut bits = 0u64;
    for v in spec.min..=spec.max {
        bits |= 1u64 << v;
    }
    bits
}
