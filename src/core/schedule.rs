//! Cron schedules for data-source sync.
//!
//! Schedules use the five-field cron syntax the edge platform accepts for
//! cron triggers (`minute hour day-of-month month day-of-week`), plus the
//! `@hourly`, `@daily`, `@weekly`, `@monthly` and `@yearly` shorthands.
//! Matching is delegated to the `cron` crate, which expects a leading
//! seconds field and numbers weekdays from 1 (Sunday), so expressions are
//! rewritten into that form before parsing.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Error parsing a cron expression.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("expected 5 fields in cron expression `{expr}`, found {found}")]
    FieldCount { expr: String, found: usize },

    #[error("invalid cron expression `{expr}`: {message}")]
    Invalid { expr: String, message: String },
}

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A parsed cron schedule.
#[derive(Debug, Clone)]
pub struct Schedule {
    source: String,
    inner: cron::Schedule,
}

impl Schedule {
    /// Parse a cron expression.
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let trimmed = expr.trim();
        let expanded = match trimmed {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other => other,
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::FieldCount {
                expr: trimmed.to_string(),
                found: fields.len(),
            });
        }

        let invalid = |message: String| ScheduleError::Invalid {
            expr: trimmed.to_string(),
            message,
        };
        let day_of_week = day_of_week(fields[4]).map_err(invalid)?;
        let with_seconds = format!("0 {} {}", fields[..4].join(" "), day_of_week);
        let inner = cron::Schedule::from_str(&with_seconds).map_err(|e| invalid(e.to_string()))?;

        Ok(Schedule {
            source: trimmed.to_string(),
            inner,
        })
    }

    /// The expression as written in the manifest.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// The first fire time strictly after `after`, at minute resolution.
    ///
    /// Returns `None` for expressions that never match (e.g. `0 0 31 2 *`).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.inner.after(&after).next()
    }
}

/// Rewrite a cron day-of-week field (0-7, Sunday is 0 or 7) with day names.
///
/// Names are left for the `cron` crate to validate.
fn day_of_week(field: &str) -> Result<String, String> {
    let parts = field
        .split(',')
        .map(day_of_week_part)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parts.join(","))
}

fn day_of_week_part(part: &str) -> Result<String, String> {
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (part, None),
    };

    let numeric = |s: &str| s.parse::<usize>().ok();
    let bounds = match range.split_once('-') {
        Some((a, b)) => numeric(a).zip(numeric(b)),
        // `1/2` means "from Monday through Sunday every 2"
        None if step.is_some() => numeric(range).map(|a| (a, 7)),
        None => numeric(range).map(|a| (a, a)),
    };
    let Some((start, end)) = bounds else {
        return Ok(part.to_string());
    };
    if start > end || end > 7 {
        return Err(format!("day-of-week `{}` is out of range", part));
    }
    let step_by = match step {
        Some(s) => match s.parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => return Err(format!("invalid day-of-week step `{}`", s)),
        },
        None => 1,
    };

    if start == 7 {
        return Ok(DAY_NAMES[0].to_string());
    }
    let last = end.min(6);
    let mut out = if start == last {
        DAY_NAMES[start].to_string()
    } else {
        let mut range = format!("{}-{}", DAY_NAMES[start], DAY_NAMES[last]);
        if let Some(s) = step {
            range.push('/');
            range.push_str(s);
        }
        range
    };
    if end == 7 && start > 0 && (7 - start) % step_by == 0 {
        out.push_str(",SUN");
    }
    Ok(out)
}

impl PartialEq for Schedule {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Schedule {}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Schedule::parse(s)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_every_minute() {
        let schedule = Schedule::parse("* * * * *").unwrap();
        let next = schedule
            .next_after(at(2024, 5, 1, 10, 30) + Duration::seconds(15))
            .unwrap();
        assert_eq!(next, at(2024, 5, 1, 10, 31));
    }

    #[test]
    fn test_step_minutes() {
        let schedule = Schedule::parse("*/15 * * * *").unwrap();
        assert_eq!(
            schedule.next_after(at(2024, 5, 1, 10, 31)).unwrap(),
            at(2024, 5, 1, 10, 45)
        );
        assert_eq!(
            schedule.next_after(at(2024, 5, 1, 10, 45)).unwrap(),
            at(2024, 5, 1, 11, 0)
        );
    }

    #[test]
    fn test_daily_shorthand_rolls_over_month() {
        let schedule = Schedule::parse("@daily").unwrap();
        assert_eq!(
            schedule.next_after(at(2024, 1, 31, 12, 0)).unwrap(),
            at(2024, 2, 1, 0, 0)
        );
        assert_eq!(schedule.as_str(), "@daily");
    }

    #[test]
    fn test_weekday_range() {
        // 09:00 Monday through Friday; 2024-05-04 is a Saturday.
        let schedule = Schedule::parse("0 9 * * 1-5").unwrap();
        assert_eq!(
            schedule.next_after(at(2024, 5, 4, 8, 0)).unwrap(),
            at(2024, 5, 6, 9, 0)
        );
    }

    #[test]
    fn test_sunday_as_zero_or_seven() {
        // 2024-05-05 is a Sunday.
        for expr in ["0 0 * * 0", "0 0 * * 7", "@weekly"] {
            let schedule = Schedule::parse(expr).unwrap();
            assert_eq!(
                schedule.next_after(at(2024, 5, 1, 0, 0)).unwrap(),
                at(2024, 5, 5, 0, 0),
                "{}",
                expr
            );
        }
    }

    #[test]
    fn test_day_of_week_rewrite() {
        assert_eq!(day_of_week("*").unwrap(), "*");
        assert_eq!(day_of_week("1-5").unwrap(), "MON-FRI");
        assert_eq!(day_of_week("0,6").unwrap(), "SUN,SAT");
        assert_eq!(day_of_week("5-7").unwrap(), "FRI-SAT,SUN");
        assert_eq!(day_of_week("mon").unwrap(), "mon");
        assert!(day_of_week("5-1").is_err());
        assert!(day_of_week("8").is_err());
    }

    #[test]
    fn test_impossible_date() {
        let schedule = Schedule::parse("0 0 31 2 *").unwrap();
        assert!(schedule.next_after(at(2024, 1, 1, 0, 0)).is_none());
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(matches!(
            Schedule::parse("* * *"),
            Err(ScheduleError::FieldCount { found: 3, .. })
        ));
        assert!(matches!(
            Schedule::parse("61 * * * *"),
            Err(ScheduleError::Invalid { .. })
        ));
        assert!(matches!(
            Schedule::parse("0 0 * * 9"),
            Err(ScheduleError::Invalid { .. })
        ));
        assert!(Schedule::parse("every minute").is_err());
    }
}
