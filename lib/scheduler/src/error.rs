//! Error types for the scheduler crate.
//!
//! - `ScheduleError`: invalid cron expressions, timezones and intervals
//! - `SchedulerError`: failures handing a fired trigger to the run queue
//! - `WatchError`: change-watch registration and change source failures

use std::fmt;

/// Errors from parsing or converting schedules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// The cron expression could not be parsed.
    InvalidCronExpression { expression: String, reason: String },
    /// Not an IANA timezone name.
    InvalidTimezone { timezone: String },
    /// Interval outside the range its unit allows.
    IntervalOutOfRange { interval: u32, unit: String, max: u32 },
    /// The expression parses but never fires again.
    NoUpcomingRun { expression: String },
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCronExpression { expression, reason } => {
                write!(f, "invalid cron expression '{expression}': {reason}")
            }
            Self::InvalidTimezone { timezone } => write!(f, "invalid timezone: {timezone}"),
            Self::IntervalOutOfRange {
                interval,
                unit,
                max,
            } => write!(f, "interval {interval} {unit} out of range (1..={max})"),
            Self::NoUpcomingRun { expression } => {
                write!(f, "cron expression '{expression}' has no upcoming run")
            }
        }
    }
}

impl std::error::Error for ScheduleError {}

/// Errors from delivering a fired trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The run could not be enqueued.
    EnqueueFailed { reason: String },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnqueueFailed { reason } => write!(f, "failed to enqueue triggered run: {reason}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

/// Errors from change watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    /// The watch configuration is unusable.
    InvalidConfig { reason: String },
    /// Table, schema or column name is not a plain identifier.
    InvalidIdentifier { identifier: String },
    /// Notify mode was requested but the source cannot push changes.
    NotifyUnsupported { table: String },
    /// Subscribing to change notifications failed.
    SubscribeFailed { table: String, reason: String },
    /// A polling query failed.
    PollFailed { table: String, reason: String },
}

impl fmt::Display for WatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { reason } => write!(f, "invalid watch config: {reason}"),
            Self::InvalidIdentifier { identifier } => {
                write!(f, "invalid SQL identifier '{identifier}'")
            }
            Self::NotifyUnsupported { table } => {
                write!(f, "change notifications are not available for {table}")
            }
            Self::SubscribeFailed { table, reason } => {
                write!(f, "failed to subscribe to changes on {table}: {reason}")
            }
            Self::PollFailed { table, reason } => {
                write!(f, "failed to poll {table} for changes: {reason}")
            }
        }
    }
}

impl std::error::Error for WatchError {}
