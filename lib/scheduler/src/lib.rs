//! Triggers for flowloom.
//!
//! Everything here ends in a [`TriggerSink`]: cron and interval schedules,
//! database change watches, and nothing else. Triggers never execute a
//! workflow themselves; they enqueue a run and let the queue worker pick it
//! up. The retention sweeper lives here too since it is the other periodic
//! background task.

pub mod change;
pub mod error;
pub mod postgres;
pub mod retention;
pub mod schedule;
pub mod scheduler;
pub mod sink;

pub use change::{
    ChangeEvent, ChangeOperation, ChangeSource, ChangeWatcher, PollCursor, WatchConfig, WatchInfo,
    WatchMode,
};
pub use error::{ScheduleError, SchedulerError, WatchError};
pub use postgres::PgChangeSource;
pub use retention::RetentionSweeper;
pub use schedule::{CronSchedule, IntervalSchedule, IntervalUnit};
pub use scheduler::{ScheduledTask, TriggerScheduler};
pub use sink::TriggerSink;
