//! Centralized server configuration.
//!
//! Loaded via the `config` crate from environment variables. Nested
//! sections use `__` as the separator, so `WORKER__CONCURRENCY=8` sets
//! `worker.concurrency`.

use serde::Deserialize;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection URL. Enables the Postgres run store and
    /// change watches; runs are kept in memory without it.
    #[serde(default)]
    pub database_url: Option<String>,

    /// NATS server URL. Enables the JetStream job queue; jobs are kept in
    /// memory without it.
    #[serde(default)]
    pub nats_url: Option<String>,

    #[serde(default)]
    pub worker: WorkerSettings,

    #[serde(default)]
    pub retention: RetentionSettings,

    #[serde(default)]
    pub monitor: MonitorSettings,

    #[serde(default)]
    pub watch: WatchSettings,
}

/// Queue worker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Wait between fetches when the queue is empty.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long a fetched job stays invisible before it is redelivered.
    #[serde(default = "default_visibility_timeout_seconds")]
    pub visibility_timeout_seconds: u64,
}

/// Run retention configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionSettings {
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

/// Live event stream configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSettings {
    #[serde(default = "default_ping_interval_seconds")]
    pub ping_interval_seconds: u64,
}

/// Change watch configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchSettings {
    /// Used when a watch request does not set `pollIntervalMs`.
    #[serde(default = "default_watch_poll_interval_ms")]
    pub default_poll_interval_ms: u64,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_concurrency() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_visibility_timeout_seconds() -> u64 {
    300
}

fn default_retention_days() -> u64 {
    30
}

fn default_sweep_interval_seconds() -> u64 {
    3600
}

fn default_ping_interval_seconds() -> u64 {
    15
}

fn default_watch_poll_interval_ms() -> u64 {
    5000
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            visibility_timeout_seconds: default_visibility_timeout_seconds(),
        }
    }
}

impl WorkerSettings {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

impl RetentionSettings {
    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days.saturating_mul(24 * 3600))
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            ping_interval_seconds: default_ping_interval_seconds(),
        }
    }
}

impl MonitorSettings {
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_seconds.max(1))
    }
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            default_poll_interval_ms: default_watch_poll_interval_ms(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_environment(config::Environment::default())
    }

    fn from_environment(environment: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(environment.separator("__").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}
