//! Change-driven triggers.
//!
//! A watch ties a database table to a workflow. Each insert, update or
//! delete on the table that passes the watch's filter enqueues a run whose
//! input is the [`ChangeEvent`].
//!
//! Sources that can push changes (Postgres `LISTEN/NOTIFY`) are used in
//! notify mode. Otherwise, or when subscribing fails, the watch polls the
//! table by its timestamp column and a [`PollCursor`] turns the returned
//! rows into events. Deletes are only observable in notify mode.

use crate::error::WatchError;
use crate::sink::TriggerSink;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use flowloom_core::{WatchId, WorkflowId};
use flowloom_workflow::{Condition, JsonMap};
use regex::Regex;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
const POLL_BATCH: usize = 500;
const MAX_SNAPSHOTS: usize = 10_000;

static IDENTIFIER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").ok());

/// Checks that `name` is a plain SQL identifier safe to interpolate.
///
/// # Errors
///
/// Returns [`WatchError::InvalidIdentifier`] otherwise.
pub fn validate_identifier(name: &str) -> Result<(), WatchError> {
    if IDENTIFIER.as_ref().is_some_and(|re| re.is_match(name)) {
        Ok(())
    } else {
        Err(WatchError::InvalidIdentifier {
            identifier: name.to_string(),
        })
    }
}

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

impl ChangeOperation {
    pub const ALL: [Self; 3] = [Self::Insert, Self::Update, Self::Delete];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a watch observes changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// Notify when the source supports it, polling otherwise.
    #[default]
    Auto,
    Notify,
    Poll,
}

fn all_operations() -> Vec<ChangeOperation> {
    ChangeOperation::ALL.to_vec()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_timestamp_column() -> String {
    "updated_at".to_string()
}

fn default_created_column() -> String {
    "created_at".to_string()
}

/// What to watch and which changes count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchConfig {
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default = "all_operations")]
    pub operations: Vec<ChangeOperation>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Evaluated against the changed row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_condition: Option<Condition>,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
    /// Creation time column. In poll mode a first-seen row created before
    /// the watch started is reported as an update. Tables without it report
    /// such rows as inserts.
    #[serde(default = "default_created_column")]
    pub created_column: String,
    #[serde(default)]
    pub mode: WatchMode,
}

impl WatchConfig {
    /// All operations, default columns, auto mode.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            schema: None,
            operations: all_operations(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            filter_condition: None,
            id_column: default_id_column(),
            timestamp_column: default_timestamp_column(),
            created_column: default_created_column(),
            mode: WatchMode::Auto,
        }
    }

    #[must_use]
    pub fn with_operations(mut self, operations: impl Into<Vec<ChangeOperation>>) -> Self {
        self.operations = operations.into();
        self
    }

    #[must_use]
    pub fn with_filter(mut self, condition: Condition) -> Self {
        self.filter_condition = Some(condition);
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: WatchMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// # Errors
    ///
    /// Returns an error for non-identifier names, an empty operation set or
    /// a zero poll interval.
    pub fn validate(&self) -> Result<(), WatchError> {
        validate_identifier(&self.table)?;
        if let Some(schema) = &self.schema {
            validate_identifier(schema)?;
        }
        validate_identifier(&self.id_column)?;
        validate_identifier(&self.timestamp_column)?;
        validate_identifier(&self.created_column)?;
        if self.operations.is_empty() {
            return Err(WatchError::InvalidConfig {
                reason: "at least one operation is required".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(WatchError::InvalidConfig {
                reason: "pollIntervalMs must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// `schema.table`, or just `table`.
    #[must_use]
    pub fn qualified_table(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.table),
            None => self.table.clone(),
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn watches(&self, operation: ChangeOperation) -> bool {
        self.operations.contains(&operation)
    }

    /// Whether an event passes the operation set and the filter.
    ///
    /// A filter that fails to evaluate rejects the event.
    #[must_use]
    pub fn accepts(&self, event: &ChangeEvent) -> bool {
        if !self.watches(event.operation) {
            return false;
        }
        let Some(filter) = &self.filter_condition else {
            return true;
        };
        let row = match (event.operation, &event.old_record) {
            (ChangeOperation::Delete, Some(old)) if event.record.is_empty() => old,
            _ => &event.record,
        };
        match filter.evaluate(&JsonValue::Object(row.clone())) {
            Ok(matched) => matched,
            Err(err) => {
                warn!(table = %self.table, error = %err, "change filter failed to evaluate");
                false
            }
        }
    }
}

/// One observed row change. Becomes the input of the triggered run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub operation: ChangeOperation,
    pub table: String,
    pub record: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_record: Option<JsonMap>,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// The event as a run payload.
    #[must_use]
    pub fn to_payload(&self) -> JsonMap {
        match serde_json::to_value(self) {
            Ok(JsonValue::Object(map)) => map,
            _ => JsonMap::new(),
        }
    }
}

/// A database that can report row changes.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Whether [`Self::subscribe`] can be used at all.
    fn supports_notify(&self) -> bool;

    /// Starts pushing changes for the watched table. The channel closes if
    /// the subscription is lost.
    async fn subscribe(
        &self,
        config: &WatchConfig,
    ) -> Result<mpsc::Receiver<ChangeEvent>, Report<WatchError>>;

    /// Tears down what [`Self::subscribe`] installed for the table. Called
    /// once no notify watch on the table remains.
    async fn unsubscribe(&self, _config: &WatchConfig) -> Result<(), Report<WatchError>> {
        Ok(())
    }

    /// Rows whose timestamp column is at or after `since`, oldest first.
    async fn poll(
        &self,
        config: &WatchConfig,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<JsonMap>, Report<WatchError>>;
}

/// Turns polled rows into change events.
///
/// Tracks the newest timestamp seen and the ids already reported at that
/// timestamp, so the inclusive `since` query never reports a row twice. A
/// bounded snapshot cache keyed by id tells updates from inserts and
/// supplies `oldRecord`. A row missing from the cache whose creation time
/// predates the cursor start is an update without `oldRecord`. Rows without
/// a readable id or timestamp are ignored.
#[derive(Debug, Clone)]
pub struct PollCursor {
    id_column: String,
    timestamp_column: String,
    created_column: Option<String>,
    start: Option<DateTime<Utc>>,
    last_timestamp: Option<DateTime<Utc>>,
    seen_at_last: HashSet<String>,
    snapshots: HashMap<String, JsonMap>,
    snapshot_order: VecDeque<String>,
    max_snapshots: usize,
}

impl PollCursor {
    #[must_use]
    pub fn new(id_column: impl Into<String>, timestamp_column: impl Into<String>) -> Self {
        Self {
            id_column: id_column.into(),
            timestamp_column: timestamp_column.into(),
            created_column: None,
            start: None,
            last_timestamp: None,
            seen_at_last: HashSet::new(),
            snapshots: HashMap::new(),
            snapshot_order: VecDeque::new(),
            max_snapshots: MAX_SNAPSHOTS,
        }
    }

    /// Ignore rows older than `start`.
    #[must_use]
    pub fn starting_at(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.last_timestamp = Some(start);
        self
    }

    #[must_use]
    pub fn with_created_column(mut self, column: impl Into<String>) -> Self {
        self.created_column = Some(column.into());
        self
    }

    #[must_use]
    pub fn with_max_snapshots(mut self, max: usize) -> Self {
        self.max_snapshots = max.max(1);
        self
    }

    /// Lower bound for the next poll.
    #[must_use]
    pub fn since(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    /// Consumes one poll's rows, returning the changes not yet reported.
    pub fn advance(&mut self, table: &str, rows: Vec<JsonMap>) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        for row in rows {
            let (Some(id), Some(timestamp)) = (self.row_id(&row), self.row_timestamp(&row)) else {
                debug!(table, "row without id or timestamp ignored");
                continue;
            };

            match self.last_timestamp {
                Some(last) if timestamp < last => continue,
                Some(last) if timestamp == last && self.seen_at_last.contains(&id) => continue,
                Some(last) if timestamp == last => {}
                _ => {
                    self.last_timestamp = Some(timestamp);
                    self.seen_at_last.clear();
                }
            }
            self.seen_at_last.insert(id.clone());

            let existed_before_start = self.created_before_start(&row);
            let old_record = self.remember(id, row.clone());
            let operation = if old_record.is_some() || existed_before_start {
                ChangeOperation::Update
            } else {
                ChangeOperation::Insert
            };
            events.push(ChangeEvent {
                operation,
                table: table.to_string(),
                record: row,
                old_record,
                timestamp,
            });
        }
        events
    }

    fn remember(&mut self, id: String, row: JsonMap) -> Option<JsonMap> {
        let previous = self.snapshots.insert(id.clone(), row);
        if previous.is_none() {
            self.snapshot_order.push_back(id);
            while self.snapshot_order.len() > self.max_snapshots {
                if let Some(evicted) = self.snapshot_order.pop_front() {
                    self.snapshots.remove(&evicted);
                }
            }
        }
        previous
    }

    fn row_id(&self, row: &JsonMap) -> Option<String> {
        match row.get(&self.id_column)? {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn created_before_start(&self, row: &JsonMap) -> bool {
        let (Some(column), Some(start)) = (&self.created_column, self.start) else {
            return false;
        };
        parse_timestamp(row, column).is_some_and(|created| created < start)
    }

    fn row_timestamp(&self, row: &JsonMap) -> Option<DateTime<Utc>> {
        parse_timestamp(row, &self.timestamp_column)
    }
}

fn parse_timestamp(row: &JsonMap, column: &str) -> Option<DateTime<Utc>> {
    let raw = row.get(column)?.as_str()?;
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    // `timestamp without time zone` columns, read as UTC
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|t| t.and_utc())
}

/// A registered watch, as reported by [`ChangeWatcher::list`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchInfo {
    pub id: WatchId,
    pub workflow_id: WorkflowId,
    pub config: WatchConfig,
    /// Mode the watch started in; `Notify` or `Poll`.
    pub mode: WatchMode,
}

struct Watch {
    info: WatchInfo,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs change watches and forwards accepted events to a [`TriggerSink`].
pub struct ChangeWatcher {
    source: Arc<dyn ChangeSource>,
    sink: Arc<dyn TriggerSink>,
    watches: Mutex<HashMap<WatchId, Watch>>,
}

impl ChangeWatcher {
    #[must_use]
    pub fn new(source: Arc<dyn ChangeSource>, sink: Arc<dyn TriggerSink>) -> Self {
        Self {
            source,
            sink,
            watches: Mutex::new(HashMap::new()),
        }
    }

    /// Starts watching `config.table` on behalf of `workflow_id`.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid config, or when notify mode is
    /// requested explicitly and cannot be established.
    pub async fn watch(
        &self,
        workflow_id: WorkflowId,
        config: WatchConfig,
    ) -> Result<WatchId, Report<WatchError>> {
        config.validate()?;
        let id = WatchId::new();

        let subscription = match config.mode {
            WatchMode::Poll => None,
            WatchMode::Notify => {
                if !self.source.supports_notify() {
                    return Err(WatchError::NotifyUnsupported {
                        table: config.qualified_table(),
                    }
                    .into());
                }
                Some(self.source.subscribe(&config).await?)
            }
            WatchMode::Auto if self.source.supports_notify() => {
                match self.source.subscribe(&config).await {
                    Ok(rx) => Some(rx),
                    Err(report) => {
                        warn!(table = %config.table, error = %report, "subscribe failed, falling back to polling");
                        None
                    }
                }
            }
            WatchMode::Auto => None,
        };
        let mode = if subscription.is_some() {
            WatchMode::Notify
        } else {
            WatchMode::Poll
        };

        let token = CancellationToken::new();
        let runner = WatchRunner {
            workflow_id,
            config: config.clone(),
            source: Arc::clone(&self.source),
            sink: Arc::clone(&self.sink),
            token: token.clone(),
        };
        let span = info_span!("watch", watch_id = %id, workflow_id = %workflow_id, table = %config.qualified_table());
        let handle = tokio::spawn(runner.run(subscription).instrument(span));

        info!(watch_id = %id, workflow_id = %workflow_id, table = %config.qualified_table(), ?mode, "watch started");
        self.watches.lock().await.insert(
            id,
            Watch {
                info: WatchInfo {
                    id,
                    workflow_id,
                    config,
                    mode,
                },
                token,
                handle,
            },
        );
        Ok(id)
    }

    /// Stops a watch. Returns false if it did not exist.
    ///
    /// Removing the last notify watch on a table also removes the source's
    /// notification hook for it.
    pub async fn unwatch(&self, id: WatchId) -> bool {
        let (watch, table_still_watched) = {
            let mut watches = self.watches.lock().await;
            let Some(watch) = watches.remove(&id) else {
                return false;
            };
            let table = watch.info.config.qualified_table();
            let still_watched = watches.values().any(|other| {
                other.info.mode == WatchMode::Notify && other.info.config.qualified_table() == table
            });
            (watch, still_watched)
        };

        watch.token.cancel();
        drop(watch.handle);
        if watch.info.mode == WatchMode::Notify && !table_still_watched {
            self.unsubscribe(&watch.info.config).await;
        }
        info!(watch_id = %id, "watch stopped");
        true
    }

    /// Registered watches, sorted by id.
    pub async fn list(&self) -> Vec<WatchInfo> {
        let watches = self.watches.lock().await;
        let mut out: Vec<_> = watches.values().map(|w| w.info.clone()).collect();
        out.sort_by_key(|w| w.id.as_ulid());
        out
    }

    pub async fn stop_all(&self) {
        let watches: Vec<_> = self.watches.lock().await.drain().collect();
        let count = watches.len();
        let mut hooked = HashMap::new();
        for (_, watch) in watches {
            watch.token.cancel();
            if watch.info.mode == WatchMode::Notify {
                hooked
                    .entry(watch.info.config.qualified_table())
                    .or_insert(watch.info.config);
            }
        }
        for config in hooked.values() {
            self.unsubscribe(config).await;
        }
        info!(count, "all watches stopped");
    }

    async fn unsubscribe(&self, config: &WatchConfig) {
        if let Err(report) = self.source.unsubscribe(config).await {
            warn!(table = %config.qualified_table(), error = %report, "failed to remove change hook");
        }
    }
}

impl fmt::Debug for ChangeWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeWatcher").finish_non_exhaustive()
    }
}

struct WatchRunner {
    workflow_id: WorkflowId,
    config: WatchConfig,
    source: Arc<dyn ChangeSource>,
    sink: Arc<dyn TriggerSink>,
    token: CancellationToken,
}

impl WatchRunner {
    async fn run(self, subscription: Option<mpsc::Receiver<ChangeEvent>>) {
        if let Some(rx) = subscription {
            if !self.listen(rx).await {
                return;
            }
            warn!("change notifications stopped, falling back to polling");
        }
        self.poll().await;
    }

    /// Returns false when cancelled, true when the channel closed.
    async fn listen(&self, mut rx: mpsc::Receiver<ChangeEvent>) -> bool {
        loop {
            tokio::select! {
                biased;

                () = self.token.cancelled() => return false,
                event = rx.recv() => match event {
                    Some(event) => self.deliver(event).await,
                    None => return true,
                },
            }
        }
    }

    async fn poll(&self) {
        let mut cursor = PollCursor::new(&self.config.id_column, &self.config.timestamp_column)
            .with_created_column(&self.config.created_column)
            .starting_at(Utc::now());
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = self.token.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let rows = match self
                .source
                .poll(&self.config, cursor.since(), POLL_BATCH)
                .await
            {
                Ok(rows) => rows,
                Err(report) => {
                    warn!(error = %report, "poll failed, retrying next tick");
                    continue;
                }
            };
            let fetched = rows.len();
            let events = cursor.advance(&self.config.table, rows);
            if events.is_empty() && fetched == POLL_BATCH {
                warn!(batch = POLL_BATCH, "poll batch holds only already-seen rows at one timestamp");
            }
            for event in events {
                self.deliver(event).await;
            }
        }
    }

    async fn deliver(&self, event: ChangeEvent) {
        if !self.config.accepts(&event) {
            debug!(operation = %event.operation, "change filtered out");
            return;
        }
        match self.sink.trigger(self.workflow_id, event.to_payload()).await {
            Ok(run_id) => debug!(run_id = %run_id, operation = %event.operation, "change triggered run"),
            Err(report) => warn!(error = %report, operation = %event.operation, "failed to enqueue change run"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::testing::channel_sink;
    use flowloom_workflow::Operator;
    use serde_json::json;

    fn row(id: i64, status: &str, at: &str) -> JsonMap {
        let JsonValue::Object(map) = json!({"id": id, "status": status, "updated_at": at}) else {
            unreachable!()
        };
        map
    }

    /// In-memory source. Polling serves `rows`; notify pushes through
    /// `notify_tx` once subscribed.
    struct FakeSource {
        notify: bool,
        rows: Mutex<Vec<JsonMap>>,
        notify_tx: Mutex<Option<mpsc::Sender<ChangeEvent>>>,
        unsubscribed: Mutex<Vec<String>>,
    }

    impl FakeSource {
        fn new(notify: bool) -> Arc<Self> {
            Arc::new(Self {
                notify,
                rows: Mutex::new(Vec::new()),
                notify_tx: Mutex::new(None),
                unsubscribed: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChangeSource for FakeSource {
        fn supports_notify(&self) -> bool {
            self.notify
        }

        async fn subscribe(
            &self,
            _config: &WatchConfig,
        ) -> Result<mpsc::Receiver<ChangeEvent>, Report<WatchError>> {
            let (tx, rx) = mpsc::channel(16);
            *self.notify_tx.lock().await = Some(tx);
            Ok(rx)
        }

        async fn unsubscribe(&self, config: &WatchConfig) -> Result<(), Report<WatchError>> {
            self.unsubscribed.lock().await.push(config.qualified_table());
            Ok(())
        }

        async fn poll(
            &self,
            config: &WatchConfig,
            since: Option<DateTime<Utc>>,
            limit: usize,
        ) -> Result<Vec<JsonMap>, Report<WatchError>> {
            let cursor = PollCursor::new(&config.id_column, &config.timestamp_column);
            let rows = self.rows.lock().await;
            Ok(rows
                .iter()
                .filter(|r| match (since, cursor.row_timestamp(r)) {
                    (Some(since), Some(at)) => at >= since,
                    _ => true,
                })
                .take(limit)
                .cloned()
                .collect())
        }
    }

    #[test]
    fn identifiers_are_validated() {
        assert!(validate_identifier("orders").is_ok());
        assert!(validate_identifier("_audit_log2").is_ok());
        assert!(validate_identifier("orders; drop table x").is_err());
        assert!(validate_identifier("2fast").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn config_defaults_from_json() {
        let config: WatchConfig = serde_json::from_value(json!({"table": "orders"})).expect("parse");
        assert_eq!(config, WatchConfig::new("orders"));
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_rejects_empty_operations() {
        let config = WatchConfig::new("orders").with_operations(Vec::new());
        assert!(matches!(
            config.validate(),
            Err(WatchError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn cursor_classifies_and_dedupes() {
        let mut cursor = PollCursor::new("id", "updated_at");
        let first = cursor.advance(
            "orders",
            vec![
                row(1, "new", "2025-01-01T00:00:00Z"),
                row(2, "new", "2025-01-01T00:00:01Z"),
            ],
        );
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|e| e.operation == ChangeOperation::Insert));

        // the inclusive re-poll returns row 2 again
        let repeat = cursor.advance("orders", vec![row(2, "new", "2025-01-01T00:00:01Z")]);
        assert!(repeat.is_empty());

        let update = cursor.advance("orders", vec![row(1, "paid", "2025-01-01T00:00:05Z")]);
        assert_eq!(update.len(), 1);
        assert_eq!(update[0].operation, ChangeOperation::Update);
        assert_eq!(
            update[0].old_record.as_ref().and_then(|r| r.get("status")),
            Some(&json!("new"))
        );
        assert_eq!(cursor.since(), DateTime::parse_from_rfc3339("2025-01-01T00:00:05Z").ok().map(|t| t.with_timezone(&Utc)));
    }

    #[test]
    fn cursor_keeps_rows_sharing_a_timestamp() {
        let mut cursor = PollCursor::new("id", "updated_at");
        let at = "2025-01-01T00:00:00Z";
        assert_eq!(cursor.advance("t", vec![row(1, "a", at)]).len(), 1);
        let next = cursor.advance("t", vec![row(1, "a", at), row(2, "b", at)]);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].record.get("id"), Some(&json!(2)));
    }

    #[test]
    fn cursor_ignores_rows_before_start() {
        let start = DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
            .expect("time")
            .with_timezone(&Utc);
        let mut cursor = PollCursor::new("id", "updated_at").starting_at(start);
        let events = cursor.advance(
            "t",
            vec![row(1, "old", "2025-05-31T23:59:59Z"), row(2, "new", "2025-06-01T00:00:01Z")],
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].record.get("id"), Some(&json!(2)));
    }

    #[test]
    fn cursor_reads_naive_timestamps_as_utc() {
        let mut cursor = PollCursor::new("id", "updated_at");
        let events = cursor.advance("t", vec![row(1, "a", "2025-01-01T08:30:00.250")]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp.to_rfc3339(), "2025-01-01T08:30:00.250+00:00");
    }

    #[test]
    fn snapshot_cache_is_bounded() {
        let mut cursor = PollCursor::new("id", "updated_at").with_max_snapshots(1);
        cursor.advance("t", vec![row(1, "a", "2025-01-01T00:00:00Z")]);
        cursor.advance("t", vec![row(2, "a", "2025-01-01T00:00:01Z")]);
        // row 1 was evicted, so its change looks like an insert
        let events = cursor.advance("t", vec![row(1, "b", "2025-01-01T00:00:02Z")]);
        assert_eq!(events[0].operation, ChangeOperation::Insert);
    }

    #[test]
    fn pre_existing_row_is_an_update() {
        let start = DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
            .expect("time")
            .with_timezone(&Utc);
        let mut cursor = PollCursor::new("id", "updated_at")
            .with_created_column("created_at")
            .starting_at(start);
        let mut existing = row(7, "paid", "2025-06-01T00:00:05Z");
        existing.insert("created_at".to_string(), json!("2025-03-01T12:00:00Z"));
        let mut fresh = row(8, "new", "2025-06-01T00:00:06Z");
        fresh.insert("created_at".to_string(), json!("2025-06-01T00:00:06Z"));

        let events = cursor.advance("orders", vec![existing, fresh]);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].operation, ChangeOperation::Update);
        assert!(events[0].old_record.is_none());
        assert_eq!(events[1].operation, ChangeOperation::Insert);

        let updates_only = WatchConfig::new("orders").with_operations(vec![ChangeOperation::Update]);
        assert!(updates_only.accepts(&events[0]));
        assert!(!updates_only.accepts(&events[1]));
    }

    #[test]
    fn filter_and_operations_gate_events() {
        let config = WatchConfig::new("orders")
            .with_operations(vec![ChangeOperation::Update])
            .with_filter(Condition::compare("status", Operator::Equals, json!("paid")));
        let event = |operation, status| ChangeEvent {
            operation,
            table: "orders".to_string(),
            record: row(1, status, "2025-01-01T00:00:00Z"),
            old_record: None,
            timestamp: Utc::now(),
        };
        assert!(config.accepts(&event(ChangeOperation::Update, "paid")));
        assert!(!config.accepts(&event(ChangeOperation::Update, "new")));
        assert!(!config.accepts(&event(ChangeOperation::Insert, "paid")));
    }

    #[test]
    fn event_payload_shape() {
        let event = ChangeEvent {
            operation: ChangeOperation::Delete,
            table: "orders".to_string(),
            record: JsonMap::new(),
            old_record: Some(row(1, "paid", "2025-01-01T00:00:00Z")),
            timestamp: Utc::now(),
        };
        let payload = event.to_payload();
        assert_eq!(payload.get("operation"), Some(&json!("DELETE")));
        assert_eq!(payload.get("table"), Some(&json!("orders")));
        assert!(payload.contains_key("oldRecord"));
        assert!(payload.contains_key("timestamp"));
    }

    #[tokio::test]
    async fn polling_watch_triggers_runs() {
        let source = FakeSource::new(false);
        let (sink, mut rx) = channel_sink();
        let watcher = ChangeWatcher::new(source.clone(), sink);
        let workflow_id = WorkflowId::new();

        let id = watcher
            .watch(
                workflow_id,
                WatchConfig::new("orders").with_poll_interval(Duration::from_millis(20)),
            )
            .await
            .expect("watch");
        assert_eq!(watcher.list().await[0].mode, WatchMode::Poll);

        let at = (Utc::now() + chrono::Duration::seconds(1)).to_rfc3339();
        source.rows.lock().await.push(row(7, "new", &at));

        let (fired, payload) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("triggered in time")
            .expect("event");
        assert_eq!(fired, workflow_id);
        assert_eq!(payload.get("operation"), Some(&json!("INSERT")));
        assert_eq!(payload["record"]["id"], json!(7));

        assert!(watcher.unwatch(id).await);
        assert!(watcher.list().await.is_empty());
    }

    #[tokio::test]
    async fn notify_watch_forwards_pushed_changes() {
        let source = FakeSource::new(true);
        let (sink, mut rx) = channel_sink();
        let watcher = ChangeWatcher::new(source.clone(), sink);

        watcher
            .watch(
                WorkflowId::new(),
                WatchConfig::new("orders").with_operations(vec![ChangeOperation::Delete]),
            )
            .await
            .expect("watch");
        assert_eq!(watcher.list().await[0].mode, WatchMode::Notify);

        let tx = source.notify_tx.lock().await.clone().expect("subscribed");
        for operation in [ChangeOperation::Insert, ChangeOperation::Delete] {
            tx.send(ChangeEvent {
                operation,
                table: "orders".to_string(),
                record: row(3, "gone", "2025-01-01T00:00:00Z"),
                old_record: None,
                timestamp: Utc::now(),
            })
            .await
            .expect("send");
        }

        let (_, payload) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("triggered in time")
            .expect("event");
        assert_eq!(payload.get("operation"), Some(&json!("DELETE")));
        watcher.stop_all().await;
    }

    #[tokio::test]
    async fn update_only_poll_watch_sees_first_update_of_old_row() {
        let source = FakeSource::new(false);
        let (sink, mut rx) = channel_sink();
        let watcher = ChangeWatcher::new(source.clone(), sink);
        watcher
            .watch(
                WorkflowId::new(),
                WatchConfig::new("orders")
                    .with_operations(vec![ChangeOperation::Update])
                    .with_poll_interval(Duration::from_millis(20)),
            )
            .await
            .expect("watch");

        let at = (Utc::now() + chrono::Duration::seconds(1)).to_rfc3339();
        let mut changed = row(7, "paid", &at);
        changed.insert("created_at".to_string(), json!("2024-01-01T00:00:00Z"));
        source.rows.lock().await.push(changed);

        let (_, payload) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("triggered in time")
            .expect("event");
        assert_eq!(payload.get("operation"), Some(&json!("UPDATE")));
        assert_eq!(payload["record"]["id"], json!(7));
        watcher.stop_all().await;
    }

    #[tokio::test]
    async fn last_notify_watch_removes_the_hook() {
        let source = FakeSource::new(true);
        let (sink, _rx) = channel_sink();
        let watcher = ChangeWatcher::new(source.clone(), sink);
        let first = watcher
            .watch(WorkflowId::new(), WatchConfig::new("orders"))
            .await
            .expect("watch");
        let second = watcher
            .watch(WorkflowId::new(), WatchConfig::new("orders"))
            .await
            .expect("watch");

        assert!(watcher.unwatch(first).await);
        assert!(source.unsubscribed.lock().await.is_empty());

        assert!(watcher.unwatch(second).await);
        assert_eq!(*source.unsubscribed.lock().await, vec!["orders".to_string()]);
    }

    #[tokio::test]
    async fn stop_all_removes_hooks_once_per_table() {
        let source = FakeSource::new(true);
        let (sink, _rx) = channel_sink();
        let watcher = ChangeWatcher::new(source.clone(), sink);
        for table in ["orders", "orders", "invoices"] {
            watcher
                .watch(WorkflowId::new(), WatchConfig::new(table))
                .await
                .expect("watch");
        }

        watcher.stop_all().await;
        let mut removed = source.unsubscribed.lock().await.clone();
        removed.sort();
        assert_eq!(removed, vec!["invoices".to_string(), "orders".to_string()]);
    }

    #[tokio::test]
    async fn notify_mode_requires_support() {
        let (sink, _rx) = channel_sink();
        let watcher = ChangeWatcher::new(FakeSource::new(false), sink);
        let result = watcher
            .watch(
                WorkflowId::new(),
                WatchConfig::new("orders").with_mode(WatchMode::Notify),
            )
            .await;
        assert!(result.is_err());
        assert!(watcher.list().await.is_empty());
    }
}
