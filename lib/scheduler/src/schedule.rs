//! Cron and interval schedules.
//!
//! Cron expressions use six fields (sec min hour dom month dow) as the
//! `cron` crate expects. Standard five-field Unix expressions are accepted
//! and run at second 0.

use crate::error::ScheduleError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prepends a seconds field to five-field expressions.
#[must_use]
pub fn normalize_cron_expr(cron_expr: &str) -> String {
    let cron_expr = cron_expr.trim();
    if cron_expr.split_whitespace().count() == 5 {
        format!("0 {cron_expr}")
    } else {
        cron_expr.to_string()
    }
}

/// Parses an IANA timezone name. `None` means UTC.
///
/// # Errors
///
/// Returns [`ScheduleError::InvalidTimezone`] for unknown names.
pub fn parse_timezone(timezone: Option<&str>) -> Result<Tz, ScheduleError> {
    match timezone.map(str::trim).filter(|tz| !tz.is_empty()) {
        None => Ok(Tz::UTC),
        Some(name) => name.parse::<Tz>().map_err(|_| ScheduleError::InvalidTimezone {
            timezone: name.to_string(),
        }),
    }
}

/// A validated cron expression bound to a timezone.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    timezone: Tz,
    schedule: Schedule,
}

impl CronSchedule {
    /// Parses `expression` and evaluates it in `timezone` (UTC if `None`).
    ///
    /// # Errors
    ///
    /// Returns an error if the expression or the timezone is invalid.
    pub fn parse(expression: &str, timezone: Option<&str>) -> Result<Self, ScheduleError> {
        let expression = normalize_cron_expr(expression);
        let schedule =
            Schedule::from_str(&expression).map_err(|e| ScheduleError::InvalidCronExpression {
                expression: expression.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            expression,
            timezone: parse_timezone(timezone)?,
            schedule,
        })
    }

    /// The normalized six-field expression.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    #[must_use]
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// First fire time strictly after `after`.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.timezone))
            .next()
            .map(|next| next.with_timezone(&Utc))
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.expression, self.timezone.name())
    }
}

/// Unit of an [`IntervalSchedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl IntervalUnit {
    /// Largest interval the unit's cron field can express.
    #[must_use]
    pub fn max_interval(&self) -> u32 {
        match self {
            Self::Seconds | Self::Minutes => 59,
            Self::Hours => 23,
            Self::Days => 31,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Seconds => "seconds",
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
        }
    }
}

/// "Every N units", converted to cron with a random offset so that many
/// workflows on the same interval do not all fire at second 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSchedule {
    pub interval: u32,
    pub unit: IntervalUnit,
}

impl IntervalSchedule {
    #[must_use]
    pub fn new(interval: u32, unit: IntervalUnit) -> Self {
        Self { interval, unit }
    }

    /// # Errors
    ///
    /// Returns [`ScheduleError::IntervalOutOfRange`] outside `1..=max`.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        let max = self.unit.max_interval();
        if self.interval == 0 || self.interval > max {
            return Err(ScheduleError::IntervalOutOfRange {
                interval: self.interval,
                unit: self.unit.as_str().to_string(),
                max,
            });
        }
        Ok(())
    }

    /// Converts to a cron expression with a random second and minute offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the interval is out of range.
    pub fn to_cron(&self) -> Result<String, ScheduleError> {
        let mut rng = rand::rng();
        let second = rng.random_range(0..60);
        let minute = rng.random_range(0..60);
        self.to_cron_with_offset(second, minute)
    }

    /// Converts to a cron expression with a fixed offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the interval is out of range.
    pub fn to_cron_with_offset(&self, second: u32, minute: u32) -> Result<String, ScheduleError> {
        self.validate()?;
        let n = self.interval;
        let (s, m) = (second % 60, minute % 60);
        Ok(match self.unit {
            IntervalUnit::Seconds => format!("*/{n} * * * * *"),
            IntervalUnit::Minutes => format!("{s} */{n} * * * *"),
            IntervalUnit::Hours => format!("{s} {m} */{n} * * *"),
            IntervalUnit::Days => format!("{s} {m} 0 */{n} * *"),
        })
    }
}
