//! Next-run evaluation for five-field cron expressions.
//!
//! Only the minute and hour fields are evaluated (`*`, a fixed value, or
//! `*/N`); day, month and weekday are accepted and ignored. A malformed
//! expression schedules the next run 24 hours after the reference.

use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Timelike};

/// Parsed minute or hour field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Any,
    At(u32),
    Every(u32),
}

impl Field {
    fn parse(s: &str, max: u32) -> Option<Field> {
        if s == "*" {
            return Some(Field::Any);
        }
        if let Some(step) = s.strip_prefix("*/") {
            let n: u32 = step.parse().ok()?;
            return (n > 0 && n <= max).then_some(Field::Every(n));
        }
        let v: u32 = s.parse().ok()?;
        (v < max).then_some(Field::At(v))
    }

    /// Matching values in ascending order.
    fn values(self, max: u32) -> Vec<u32> {
        match self {
            Field::Any => (0..max).collect(),
            Field::At(v) => vec![v],
            Field::Every(n) => (0..max).step_by(n as usize).collect(),
        }
    }
}

/// A parsed schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    minute: Field,
    hour: Field,
}

impl Schedule {
    pub fn parse(expr: &str) -> Option<Schedule> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return None;
        }
        let minute = Field::parse(fields[0], 60)?;
        let hour = Field::parse(fields[1], 24)?;
        if fields[2..].iter().any(|f| *f != "*") {
            tracing::debug!("cron {:?}: day/month/weekday fields are not evaluated", expr);
        }
        Some(Schedule { minute, hour })
    }

    /// Smallest matching minute strictly after `reference`.
    pub fn next_after(&self, reference: NaiveDateTime) -> NaiveDateTime {
        let minutes = self.minute.values(60);
        let hours = self.hour.values(24);
        let base = reference.date();
        for day in 0..=1 {
            let date = base + Duration::days(day);
            for &h in &hours {
                for &m in &minutes {
                    if let Some(candidate) = date.and_hms_opt(h, m, 0) {
                        if candidate > reference {
                            return candidate;
                        }
                    }
                }
            }
        }
        // Unreachable for valid fields: every schedule matches once a day.
        reference + Duration::days(1)
    }
}

/// Next run strictly after `reference`; malformed expressions give `reference + 24h`.
pub fn next_run_after(expr: &str, reference: NaiveDateTime) -> NaiveDateTime {
    match Schedule::parse(expr) {
        Some(s) => s.next_after(reference),
        None => {
            tracing::warn!("malformed cron expression {:?}, retrying in 24h", expr);
            reference + Duration::days(1)
        }
    }
}

/// Local-time evaluation on epoch milliseconds.
pub fn next_run_millis(expr: &str, now_ms: i64) -> i64 {
    let Some(now) = DateTime::from_timestamp_millis(now_ms) else {
        return now_ms + Duration::days(1).num_milliseconds();
    };
    let local = now.with_timezone(&Local).naive_local();
    let next = next_run_after(expr, local.with_nanosecond(0).unwrap_or(local));
    // Skipped local times (DST gaps) move forward an hour.
    let resolved = Local
        .from_local_datetime(&next)
        .earliest()
        .or_else(|| Local.from_local_datetime(&(next + Duration::hours(1))).earliest());
    match resolved {
        Some(dt) if dt.timestamp_millis() > now_ms => dt.timestamp_millis(),
        _ => now_ms + Duration::minutes(1).num_milliseconds(),
    }
}
