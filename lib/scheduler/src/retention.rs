//! Periodic removal of old terminal runs.

use chrono::Utc;
use flowloom_workflow::RunStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Deletes completed, failed and cancelled runs older than the retention
/// window. Running and pending runs are never touched.
pub struct RetentionSweeper {
    runs: Arc<dyn RunStore>,
    retention: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    #[must_use]
    pub fn new(runs: Arc<dyn RunStore>, retention: Duration, interval: Duration) -> Self {
        Self {
            runs,
            retention,
            interval,
        }
    }

    /// Runs one sweep. Returns the number of records removed, zero on error.
    pub async fn sweep(&self) -> u64 {
        let retention = chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::MAX);
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            return 0;
        };
        match self.runs.purge_terminal_before(cutoff).await {
            Ok(0) => {
                debug!(%cutoff, "retention sweep found nothing to remove");
                0
            }
            Ok(removed) => {
                info!(removed, %cutoff, "retention sweep removed old runs");
                removed
            }
            Err(report) => {
                warn!(error = %report, "retention sweep failed");
                0
            }
        }
    }

    /// Spawns the sweep loop. The first sweep runs immediately.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;

                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                }
            }
            debug!("retention sweeper stopped");
        })
    }
}

impl std::fmt::Debug for RetentionSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionSweeper")
            .field("retention", &self.retention)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
