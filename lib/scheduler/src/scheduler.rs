//! Time-based triggers.
//!
//! Each scheduled workflow gets one background task that sleeps until the
//! next fire time and then hands an empty payload to the [`TriggerSink`].
//! Registering a workflow again replaces its task.

use crate::error::ScheduleError;
use crate::schedule::{CronSchedule, IntervalSchedule};
use crate::sink::TriggerSink;
use chrono::{DateTime, Utc};
use flowloom_core::WorkflowId;
use flowloom_workflow::JsonMap;
use rootcause::Report;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

/// A workflow's active schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    pub workflow_id: WorkflowId,
    pub cron_expression: String,
    pub timezone: String,
    pub next_run: Option<DateTime<Utc>>,
}

struct Task {
    schedule: CronSchedule,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Task {
    fn stop(self) {
        self.token.cancel();
        drop(self.handle);
    }
}

/// Runs cron schedules, at most one per workflow.
pub struct TriggerScheduler {
    sink: Arc<dyn TriggerSink>,
    tasks: Mutex<HashMap<WorkflowId, Task>>,
}

impl TriggerScheduler {
    #[must_use]
    pub fn new(sink: Arc<dyn TriggerSink>) -> Self {
        Self {
            sink,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Starts firing `workflow_id` on `cron_expression`, replacing any
    /// existing schedule for it.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid expression or timezone. The existing
    /// schedule, if any, is left untouched in that case.
    pub async fn schedule_workflow(
        &self,
        workflow_id: WorkflowId,
        cron_expression: &str,
        timezone: Option<&str>,
    ) -> Result<ScheduledTask, Report<ScheduleError>> {
        let schedule = CronSchedule::parse(cron_expression, timezone)?;
        if schedule.next_after(Utc::now()).is_none() {
            return Err(ScheduleError::NoUpcomingRun {
                expression: schedule.expression().to_string(),
            }
            .into());
        }

        let mut tasks = self.tasks.lock().await;
        if let Some(previous) = tasks.remove(&workflow_id) {
            debug!(workflow_id = %workflow_id, "replacing existing schedule");
            previous.stop();
        }

        let token = CancellationToken::new();
        let span = info_span!("schedule", workflow_id = %workflow_id, cron = %schedule.expression());
        let handle = tokio::spawn(
            fire_loop(
                workflow_id,
                schedule.clone(),
                Arc::clone(&self.sink),
                token.clone(),
            )
            .instrument(span),
        );
        let task = describe(workflow_id, &schedule);
        tasks.insert(
            workflow_id,
            Task {
                schedule,
                token,
                handle,
            },
        );

        info!(workflow_id = %workflow_id, cron = %task.cron_expression, timezone = %task.timezone, "workflow scheduled");
        Ok(task)
    }

    /// Converts an interval to cron and schedules it.
    ///
    /// # Errors
    ///
    /// Returns an error if the interval is out of range or the timezone is
    /// invalid.
    pub async fn schedule_interval(
        &self,
        workflow_id: WorkflowId,
        interval: IntervalSchedule,
        timezone: Option<&str>,
    ) -> Result<ScheduledTask, Report<ScheduleError>> {
        let cron_expression = interval.to_cron()?;
        self.schedule_workflow(workflow_id, &cron_expression, timezone)
            .await
    }

    /// Replaces a workflow's schedule. Same as [`Self::schedule_workflow`].
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid expression or timezone.
    pub async fn reschedule_workflow(
        &self,
        workflow_id: WorkflowId,
        cron_expression: &str,
        timezone: Option<&str>,
    ) -> Result<ScheduledTask, Report<ScheduleError>> {
        self.schedule_workflow(workflow_id, cron_expression, timezone)
            .await
    }

    /// Stops a workflow's schedule. Returns false if it had none.
    pub async fn unschedule_workflow(&self, workflow_id: WorkflowId) -> bool {
        let removed = self.tasks.lock().await.remove(&workflow_id);
        match removed {
            Some(task) => {
                task.stop();
                info!(workflow_id = %workflow_id, "workflow unscheduled");
                true
            }
            None => false,
        }
    }

    /// Stops every schedule.
    pub async fn stop_all(&self) {
        let tasks: Vec<_> = self.tasks.lock().await.drain().collect();
        let count = tasks.len();
        for (_, task) in tasks {
            task.stop();
        }
        info!(count, "all schedules stopped");
    }

    pub async fn is_scheduled(&self, workflow_id: WorkflowId) -> bool {
        self.tasks.lock().await.contains_key(&workflow_id)
    }

    /// Scheduled workflow ids, sorted.
    pub async fn list_scheduled(&self) -> Vec<WorkflowId> {
        let mut ids: Vec<_> = self.tasks.lock().await.keys().copied().collect();
        ids.sort_by_key(WorkflowId::as_ulid);
        ids
    }

    /// Details of every schedule, sorted by workflow id.
    pub async fn scheduled_tasks(&self) -> Vec<ScheduledTask> {
        let tasks = self.tasks.lock().await;
        let mut out: Vec<_> = tasks
            .iter()
            .map(|(id, task)| describe(*id, &task.schedule))
            .collect();
        out.sort_by_key(|t| t.workflow_id.as_ulid());
        out
    }
}

impl std::fmt::Debug for TriggerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerScheduler").finish_non_exhaustive()
    }
}

fn describe(workflow_id: WorkflowId, schedule: &CronSchedule) -> ScheduledTask {
    ScheduledTask {
        workflow_id,
        cron_expression: schedule.expression().to_string(),
        timezone: schedule.timezone().name().to_string(),
        next_run: schedule.next_after(Utc::now()),
    }
}

async fn fire_loop(
    workflow_id: WorkflowId,
    schedule: CronSchedule,
    sink: Arc<dyn TriggerSink>,
    token: CancellationToken,
) {
    let mut last_fire: Option<DateTime<Utc>> = None;
    loop {
        // never fire the same instant twice if the wall clock lags the timer
        let from = match last_fire {
            Some(last) => last.max(Utc::now()),
            None => Utc::now(),
        };
        let Some(next) = schedule.next_after(from) else {
            warn!("schedule has no upcoming run, stopping");
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();

        tokio::select! {
            biased;

            () = token.cancelled() => return,
            () = tokio::time::sleep(wait) => {}
        }

        last_fire = Some(next);
        match sink.trigger(workflow_id, JsonMap::new()).await {
            Ok(run_id) => debug!(run_id = %run_id, scheduled_for = %next, "schedule fired"),
            Err(report) => warn!(error = %report, "failed to enqueue scheduled run"),
        }
    }
}
