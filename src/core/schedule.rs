//! Schedule parsing and next occurrence calculation.
//!
//! Supports standard cron expressions, extended 6-field cron (with seconds),
//! shortcuts (@daily, @hourly, etc.), epoch-aligned intervals (@every) and
//! one-shot instants (@at).

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use super::trigger::Trigger;

/// Errors that can occur when parsing or using schedules.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Invalid cron expression.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    /// Invalid interval expression.
    #[error("invalid interval expression: {0}")]
    InvalidInterval(String),

    /// Invalid one-shot instant.
    #[error("invalid date: {0}")]
    InvalidDate(String),

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// No more occurrences.
    #[error("no more occurrences")]
    NoMoreOccurrences,
}

/// A time rule usable as a job trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ScheduleRecord", into = "ScheduleRecord")]
pub struct Schedule {
    /// The original expression string.
    expression: String,
    /// The timezone cron fields are evaluated in.
    timezone: Tz,
    /// No occurrence is produced before this instant.
    start: Option<DateTime<Utc>>,
    schedule_type: ScheduleType,
}

#[derive(Debug, Clone)]
enum ScheduleType {
    Cron(Box<CronSchedule>),
    /// Fixed period, aligned to `start` (or the Unix epoch).
    Interval(Duration),
    /// Fires exactly once.
    Once(DateTime<Utc>),
}

/// Serialized form; the parsed rule is rebuilt from it on load.
#[derive(Serialize, Deserialize)]
struct ScheduleRecord {
    expression: String,
    #[serde(default = "default_timezone")]
    timezone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start: Option<DateTime<Utc>>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Schedule {
    /// Create a new schedule from an expression, evaluated in UTC.
    ///
    /// Supports:
    /// - Standard 5-field cron: `minute hour day month weekday`
    /// - Extended 6-field cron: `second minute hour day month weekday`
    /// - Shortcuts: `@yearly`, `@monthly`, `@weekly`, `@daily`, `@hourly`
    /// - Intervals: `@every 5m`, `@every 1h30m`
    /// - One-shot: `@at 2024-01-15T12:00:00Z`
    pub fn new(expression: impl Into<String>) -> Result<Self, ScheduleError> {
        Self::with_timezone(expression, "UTC")
    }

    /// Create a new schedule with a specific timezone.
    pub fn with_timezone(
        expression: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Result<Self, ScheduleError> {
        let expression = expression.into();
        let timezone = timezone.into();

        let tz = timezone
            .parse::<Tz>()
            .map_err(|_| ScheduleError::InvalidTimezone(timezone.clone()))?;

        let schedule_type = Self::parse_expression(&expression)?;

        Ok(Self {
            expression,
            timezone: tz,
            start: None,
            schedule_type,
        })
    }

    /// Suppress occurrences before `start`.
    ///
    /// Intervals are aligned to `start` instead of the Unix epoch.
    pub fn starting_at(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    fn parse_expression(expression: &str) -> Result<ScheduleType, ScheduleError> {
        let trimmed = expression.trim();

        if trimmed.starts_with('@') {
            return Self::parse_shortcut(trimmed);
        }

        Self::parse_cron(trimmed)
    }

    /// Parse a shortcut expression (@daily, @every, @at, etc.).
    fn parse_shortcut(expression: &str) -> Result<ScheduleType, ScheduleError> {
        let lowered = expression.to_lowercase();
        match lowered.as_str() {
            "@yearly" | "@annually" => Self::parse_cron("0 0 1 1 *"),
            "@monthly" => Self::parse_cron("0 0 1 * *"),
            "@weekly" => Self::parse_cron("0 0 * * SUN"),
            "@daily" | "@midnight" => Self::parse_cron("0 0 * * *"),
            "@hourly" => Self::parse_cron("0 * * * *"),
            s if s.starts_with("@every ") => Self::parse_interval(&expression[7..]),
            // Keep the original casing for the timestamp.
            s if s.starts_with("@at ") => Self::parse_instant(&expression[4..]),
            _ => Err(ScheduleError::InvalidCron(format!(
                "unknown shortcut: {}",
                expression
            ))),
        }
    }

    fn parse_interval(interval: &str) -> Result<ScheduleType, ScheduleError> {
        let duration = Self::parse_duration(interval.trim())?;
        Ok(ScheduleType::Interval(duration))
    }

    fn parse_instant(instant: &str) -> Result<ScheduleType, ScheduleError> {
        let at = DateTime::parse_from_rfc3339(instant.trim())
            .map_err(|e| ScheduleError::InvalidDate(format!("{}: {}", instant.trim(), e)))?;
        Ok(ScheduleType::Once(at.with_timezone(&Utc)))
    }

    /// Parse a duration string like "5m", "1h", "1h30m", "30s".
    fn parse_duration(s: &str) -> Result<Duration, ScheduleError> {
        let mut total_secs: u64 = 0;
        let mut current_num = String::new();

        for c in s.chars() {
            if c.is_ascii_digit() {
                current_num.push(c);
            } else {
                let num: u64 = current_num
                    .parse()
                    .map_err(|_| ScheduleError::InvalidInterval(s.to_string()))?;
                current_num.clear();

                let unit = match c {
                    's' => 1,
                    'm' => 60,
                    'h' => 3600,
                    'd' => 86400,
                    _ => return Err(ScheduleError::InvalidInterval(s.to_string())),
                };
                total_secs = num
                    .checked_mul(unit)
                    .and_then(|secs| total_secs.checked_add(secs))
                    .ok_or_else(|| ScheduleError::InvalidInterval(s.to_string()))?;
            }
        }

        // Trailing digits without a unit ("5") are rejected.
        if !current_num.is_empty() || total_secs == 0 {
            return Err(ScheduleError::InvalidInterval(s.to_string()));
        }

        Ok(Duration::from_secs(total_secs))
    }

    fn parse_cron(expression: &str) -> Result<ScheduleType, ScheduleError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();

        let cron_expr = match fields.len() {
            5 => format!("0 {}", expression),
            6 => expression.to_string(),
            _ => {
                return Err(ScheduleError::InvalidCron(format!(
                    "expected 5 or 6 fields, got {}",
                    fields.len()
                )));
            }
        };

        let schedule = CronSchedule::from_str(&cron_expr)
            .map_err(|e| ScheduleError::InvalidCron(e.to_string()))?;

        Ok(ScheduleType::Cron(Box::new(schedule)))
    }

    /// Get the next occurrence strictly after the given time.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        match &self.schedule_type {
            ScheduleType::Cron(schedule) => {
                // Searching from just before `start` keeps `start` itself eligible.
                let from = match self.start {
                    Some(start) if after < start => start - chrono::Duration::microseconds(1),
                    _ => after,
                };
                let local_time = from.with_timezone(&self.timezone);
                schedule
                    .after(&local_time)
                    .next()
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok_or(ScheduleError::NoMoreOccurrences)
            }
            ScheduleType::Interval(period) => self.next_interval_after(after, *period),
            ScheduleType::Once(at) => {
                if *at > after && self.start.is_none_or(|start| *at >= start) {
                    Ok(*at)
                } else {
                    Err(ScheduleError::NoMoreOccurrences)
                }
            }
        }
    }

    fn next_interval_after(
        &self,
        after: DateTime<Utc>,
        period: Duration,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        let anchor = self.start.unwrap_or(DateTime::UNIX_EPOCH);
        if after < anchor {
            return Ok(anchor);
        }

        let period_us = i64::try_from(period.as_micros())
            .map_err(|_| ScheduleError::InvalidInterval(self.expression.clone()))?;
        let elapsed_us = (after - anchor)
            .num_microseconds()
            .ok_or(ScheduleError::NoMoreOccurrences)?;
        let periods = elapsed_us / period_us + 1;

        periods
            .checked_mul(period_us)
            .and_then(|offset| anchor.checked_add_signed(chrono::Duration::microseconds(offset)))
            .ok_or(ScheduleError::NoMoreOccurrences)
    }

    /// Get the next N occurrences after the given time.
    pub fn next_n_after(
        &self,
        after: DateTime<Utc>,
        n: usize,
    ) -> Result<Vec<DateTime<Utc>>, ScheduleError> {
        let mut results = Vec::with_capacity(n);
        let mut current = after;
        for _ in 0..n {
            match self.next_after(current) {
                Ok(next) => {
                    results.push(next);
                    current = next;
                }
                Err(ScheduleError::NoMoreOccurrences) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(results)
    }

    /// Get the original expression string.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Get the timezone name.
    pub fn timezone(&self) -> &str {
        self.timezone.name()
    }

    /// Get the start instant, if any.
    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.start
    }
}

impl Trigger for Schedule {
    fn next_fire_time(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.next_after(after).ok()
    }
}

impl PartialEq for Schedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
            && self.timezone == other.timezone
            && self.start == other.start
    }
}

impl Eq for Schedule {}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.timezone == Tz::UTC {
            write!(f, "{}", self.expression)
        } else {
            write!(f, "{} ({})", self.expression, self.timezone.name())
        }
    }
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<ScheduleRecord> for Schedule {
    type Error = ScheduleError;

    fn try_from(record: ScheduleRecord) -> Result<Self, Self::Error> {
        let schedule = Self::with_timezone(record.expression, record.timezone)?;
        Ok(match record.start {
            Some(start) => schedule.starting_at(start),
            None => schedule,
        })
    }
}

impl From<Schedule> for ScheduleRecord {
    fn from(schedule: Schedule) -> Self {
        Self {
            timezone: schedule.timezone.name().to_string(),
            expression: schedule.expression,
            start: schedule.start,
        }
    }
}
