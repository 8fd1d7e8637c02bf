//! Service wiring.

use crate::config::ServerConfig;
use crate::db::PgRunStore;
use crate::error::StartupError;
use crate::state::AppState;
use flowloom_integration::HttpRequestExecutor;
use flowloom_queue::{
    InMemoryJobQueue, InMemoryWorkflowSource, JobQueue, NatsJobQueue, NatsQueueConfig, QueueWorker,
    RunQueue, WorkerConfig,
};
use flowloom_scheduler::{
    ChangeWatcher, PgChangeSource, RetentionSweeper, TriggerScheduler, TriggerSink,
};
use flowloom_workflow::nodes::register_builtin;
use flowloom_workflow::{InMemoryRunStore, NodeRegistry, RunStore, WorkflowEngine};
use rootcause::Report;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Every node type the server can execute.
#[must_use]
pub fn node_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_builtin(&mut registry);
    registry.register(HttpRequestExecutor::new());
    registry
}

/// Running background services plus the state handlers share.
pub struct Services {
    pub state: AppState,
    worker: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl Services {
    /// Connects backends and starts the worker and retention sweeper.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured database or NATS server cannot be
    /// reached, or migrations fail.
    pub async fn start(config: &ServerConfig) -> Result<Self, Report<StartupError>> {
        let shutdown = CancellationToken::new();

        let pool = match &config.database_url {
            Some(url) => Some(connect_database(url).await?),
            None => {
                info!("DATABASE_URL not set, keeping runs in memory; change watches disabled");
                None
            }
        };

        let runs: Arc<dyn RunStore> = match &pool {
            Some(pool) => Arc::new(PgRunStore::new(pool.clone())),
            None => Arc::new(InMemoryRunStore::new()),
        };

        let registry = node_registry();
        info!(node_types = registry.len(), "node registry built");
        let engine = Arc::new(WorkflowEngine::new(Arc::new(registry), Arc::clone(&runs)));

        let visibility_timeout = config.worker.visibility_timeout();
        let queue: Arc<dyn JobQueue> = match &config.nats_url {
            Some(url) => {
                let nats = NatsQueueConfig::new(url).with_visibility_timeout(visibility_timeout);
                let queue = NatsJobQueue::connect(&nats)
                    .await
                    .map_err(|report| StartupError::Queue {
                        details: report.to_string(),
                    })?;
                info!(url = %url, "using JetStream job queue");
                Arc::new(queue)
            }
            None => {
                info!("NATS_URL not set, using in-memory job queue");
                Arc::new(InMemoryJobQueue::new(visibility_timeout))
            }
        };

        let run_queue = RunQueue::new(Arc::clone(&queue), Arc::clone(&runs));
        let workflows = InMemoryWorkflowSource::new();

        let worker = Arc::new(QueueWorker::new(
            queue,
            Arc::clone(&engine),
            Arc::new(workflows.clone()),
            WorkerConfig {
                concurrency: config.worker.concurrency,
                poll_interval: config.worker.poll_interval(),
                ..WorkerConfig::default()
            },
        ))
        .spawn(shutdown.clone());

        let sink: Arc<dyn TriggerSink> = Arc::new(run_queue.clone());
        let scheduler = Arc::new(TriggerScheduler::new(Arc::clone(&sink)));
        let watcher = pool.map(|pool| {
            Arc::new(ChangeWatcher::new(
                Arc::new(PgChangeSource::new(pool)),
                Arc::clone(&sink),
            ))
        });

        let sweeper = RetentionSweeper::new(
            runs,
            config.retention.retention(),
            config.retention.sweep_interval(),
        )
        .spawn(shutdown.clone());

        Ok(Self {
            state: AppState {
                engine,
                run_queue,
                workflows,
                scheduler,
                watcher,
                ping_interval: config.monitor.ping_interval(),
                default_watch_poll_interval_ms: config.watch.default_poll_interval_ms,
                shutdown,
            },
            worker,
            sweeper,
        })
    }

    /// Stops schedules and watches, then waits for the worker and sweeper.
    /// The worker finishes the runs it already started.
    pub async fn shutdown(self) {
        self.state.scheduler.stop_all().await;
        if let Some(watcher) = &self.state.watcher {
            watcher.stop_all().await;
        }
        self.state.shutdown.cancel();

        if let Err(e) = self.worker.await {
            warn!(error = %e, "queue worker ended abnormally");
        }
        if let Err(e) = self.sweeper.await {
            warn!(error = %e, "retention sweeper ended abnormally");
        }
        info!("background services stopped");
    }
}

async fn connect_database(url: &str) -> Result<PgPool, Report<StartupError>> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(url)
        .await
        .map_err(|e| StartupError::Database {
            details: e.to_string(),
        })?;

    info!("running database migrations");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StartupError::Migration {
            details: e.to_string(),
        })?;
    Ok(pool)
}
