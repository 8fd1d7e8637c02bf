//! Postgres change source.
//!
//! Notify mode installs a row trigger that calls `pg_notify` with the change
//! as JSON and listens on a per-table channel. Polling selects rows by the
//! watch's timestamp column. Every interpolated name has passed
//! [`validate_identifier`](crate::change::validate_identifier).

use crate::change::{ChangeEvent, ChangeOperation, ChangeSource, WatchConfig};
use crate::error::WatchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowloom_workflow::JsonMap;
use rootcause::Report;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const NOTIFY_FUNCTION: &str = r"
CREATE OR REPLACE FUNCTION flowloom_notify_change() RETURNS trigger AS $$
BEGIN
    PERFORM pg_notify(
        TG_ARGV[0],
        json_build_object(
            'operation', TG_OP,
            'table', TG_TABLE_NAME,
            'record', CASE WHEN TG_OP = 'DELETE' THEN NULL ELSE row_to_json(NEW) END,
            'oldRecord', CASE WHEN TG_OP = 'INSERT' THEN NULL ELSE row_to_json(OLD) END,
            'timestamp', now()
        )::text
    );
    RETURN COALESCE(NEW, OLD);
END;
$$ LANGUAGE plpgsql";

const CHANNEL_BUFFER: usize = 256;
/// Postgres truncates identifiers past this length and rejects longer
/// `pg_notify` channel names outright.
const MAX_IDENTIFIER_LEN: usize = 63;
const NAME_HASH_LEN: usize = 8;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Notification {
    operation: ChangeOperation,
    table: String,
    #[serde(default)]
    record: Option<JsonMap>,
    #[serde(default)]
    old_record: Option<JsonMap>,
    timestamp: DateTime<Utc>,
}

impl From<Notification> for ChangeEvent {
    fn from(n: Notification) -> Self {
        Self {
            operation: n.operation,
            table: n.table,
            record: n.record.unwrap_or_default(),
            old_record: n.old_record,
            timestamp: n.timestamp,
        }
    }
}

/// Watches Postgres tables through `LISTEN/NOTIFY` or polling.
#[derive(Debug, Clone)]
pub struct PgChangeSource {
    pool: PgPool,
}

impl PgChangeSource {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn install_trigger(
        &self,
        config: &WatchConfig,
        channel: &str,
    ) -> Result<(), Report<WatchError>> {
        let table = config.qualified_table();
        let trigger = trigger_name(config);
        let subscribe_failed = |e: sqlx::Error| WatchError::SubscribeFailed {
            table: table.clone(),
            reason: e.to_string(),
        };

        sqlx::query(NOTIFY_FUNCTION)
            .execute(&self.pool)
            .await
            .map_err(subscribe_failed)?;
        sqlx::query(&format!("DROP TRIGGER IF EXISTS {trigger} ON {table}"))
            .execute(&self.pool)
            .await
            .map_err(subscribe_failed)?;
        sqlx::query(&format!(
            "CREATE TRIGGER {trigger} AFTER INSERT OR UPDATE OR DELETE ON {table} \
             FOR EACH ROW EXECUTE FUNCTION flowloom_notify_change('{channel}')"
        ))
        .execute(&self.pool)
        .await
        .map_err(subscribe_failed)?;

        debug!(table = %table, trigger = %trigger, "change trigger installed");
        Ok(())
    }
}

#[async_trait]
impl ChangeSource for PgChangeSource {
    fn supports_notify(&self) -> bool {
        true
    }

    async fn subscribe(
        &self,
        config: &WatchConfig,
    ) -> Result<mpsc::Receiver<ChangeEvent>, Report<WatchError>> {
        config.validate()?;
        let channel = channel_name(config);
        self.install_trigger(config, &channel).await?;

        let table = config.qualified_table();
        let mut listener = PgListener::connect_with(&self.pool).await.map_err(|e| {
            WatchError::SubscribeFailed {
                table: table.clone(),
                reason: e.to_string(),
            }
        })?;
        listener
            .listen(&channel)
            .await
            .map_err(|e| WatchError::SubscribeFailed {
                table: table.clone(),
                reason: e.to_string(),
            })?;

        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        tokio::spawn(async move {
            loop {
                let notification = tokio::select! {
                    () = tx.closed() => break,
                    received = listener.recv() => match received {
                        Ok(notification) => notification,
                        Err(e) => {
                            warn!(table = %table, error = %e, "change listener failed");
                            break;
                        }
                    },
                };
                match serde_json::from_str::<Notification>(notification.payload()) {
                    Ok(parsed) => {
                        if tx.send(parsed.into()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(table = %table, error = %e, "undecodable change notification"),
                }
            }
            debug!(table = %table, "change listener stopped");
        });

        Ok(rx)
    }

    async fn unsubscribe(&self, config: &WatchConfig) -> Result<(), Report<WatchError>> {
        config.validate()?;
        let table = config.qualified_table();
        let trigger = trigger_name(config);
        sqlx::query(&format!("DROP TRIGGER IF EXISTS {trigger} ON {table}"))
            .execute(&self.pool)
            .await
            .map_err(|e| WatchError::SubscribeFailed {
                table: table.clone(),
                reason: e.to_string(),
            })?;
        debug!(table = %table, trigger = %trigger, "change trigger dropped");
        Ok(())
    }

    async fn poll(
        &self,
        config: &WatchConfig,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<JsonMap>, Report<WatchError>> {
        config.validate()?;
        let table = config.qualified_table();
        let sql = poll_query(config);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows: Vec<String> = sqlx::query_scalar(&sql)
            .bind(since)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| WatchError::PollFailed {
                table: table.clone(),
                reason: e.to_string(),
            })?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let parsed: JsonMap =
                serde_json::from_str(&row).map_err(|e| WatchError::PollFailed {
                    table: table.clone(),
                    reason: format!("row is not a JSON object: {e}"),
                })?;
            out.push(parsed);
        }
        Ok(out)
    }
}

fn poll_query(config: &WatchConfig) -> String {
    let table = config.qualified_table();
    let ts = &config.timestamp_column;
    let id = &config.id_column;
    format!(
        "SELECT row_to_json(t)::text FROM {table} t \
         WHERE $1::timestamptz IS NULL OR t.{ts} >= $1 \
         ORDER BY t.{ts} ASC, t.{id} ASC LIMIT $2"
    )
}

fn channel_name(config: &WatchConfig) -> String {
    match &config.schema {
        Some(schema) => bounded_name(&format!("flowloom_change_{schema}_{}", config.table)),
        None => bounded_name(&format!("flowloom_change_{}", config.table)),
    }
}

fn trigger_name(config: &WatchConfig) -> String {
    bounded_name(&format!("flowloom_watch_{}", config.table))
}

/// `name` if it fits in an identifier, otherwise a truncated prefix plus a
/// short digest of the full name.
fn bounded_name(name: &str) -> String {
    if name.len() <= MAX_IDENTIFIER_LEN {
        return name.to_string();
    }
    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    let keep = MAX_IDENTIFIER_LEN - NAME_HASH_LEN - 1;
    let prefix: String = name.chars().take(keep).collect();
    format!("{prefix}_{}", &digest[..NAME_HASH_LEN])
}
