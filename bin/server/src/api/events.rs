//! Server-sent event stream of a run's lifecycle.
//!
//! The stream opens with `connected`, forwards every monitor event for the
//! run, sends `ping` on a fixed interval and closes after `runComplete`.
//! Subscribing to a run that already finished yields `connected` followed
//! by a `runComplete` built from the stored record. The listener is removed
//! as soon as the client goes away.

use super::parse_id;
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use flowloom_core::WorkflowRunId;
use flowloom_workflow::{MonitorEvent, MonitorEventType, RunRecord};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

const STREAM_BUFFER: usize = 64;

/// Opens the event stream for a run.
pub async fn stream(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let run_id: WorkflowRunId = parse_id("run", &run_id)?;
    let monitor = state.engine.monitor().clone();

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<MonitorEvent>();
    let listener_id = monitor.register_listener(run_id, Arc::new(events_tx)).await;

    let finished = if monitor.live_run(run_id).await.is_none() {
        match state.engine.runs().get(run_id).await {
            Ok(Some(record)) if record.status.is_terminal() => Some(record),
            Ok(_) => None,
            Err(report) => {
                warn!(run_id = %run_id, error = %report, "run lookup failed");
                None
            }
        }
    } else {
        None
    };

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let shutdown = state.shutdown.clone();
    let period = state.ping_interval;

    tokio::spawn(async move {
        let mut ping = tokio::time::interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut replay = finished.as_ref().map(completion_event);

        loop {
            let event = tokio::select! {
                biased;

                () = shutdown.cancelled() => break,
                () = tx.closed() => break,
                received = events_rx.recv() => match received {
                    Some(event) => event,
                    None => break,
                },
                _ = ping.tick() => MonitorEvent::new(run_id, MonitorEventType::Ping, json!({})),
            };

            let done = event.event_type == MonitorEventType::RunComplete;
            if !forward(&tx, &event).await || done {
                break;
            }
            // The stored completion follows the `connected` event.
            if event.event_type == MonitorEventType::Connected {
                if let Some(completion) = replay.take() {
                    forward(&tx, &completion).await;
                    break;
                }
            }
        }

        monitor.remove_listener(run_id, listener_id).await;
        debug!(run_id = %run_id, listener_id = %listener_id, "event stream closed");
    });

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}

fn completion_event(record: &RunRecord) -> MonitorEvent {
    MonitorEvent::new(
        record.id,
        MonitorEventType::RunComplete,
        json!({
            "status": record.status,
            "error": record.error,
            "failedNode": record.failed_node,
        }),
    )
}

/// Sends one event. Returns false once the client has disconnected.
async fn forward(tx: &mpsc::Sender<Result<Event, Infallible>>, event: &MonitorEvent) -> bool {
    let sse = match Event::default()
        .event(event.event_type.as_str())
        .json_data(event)
    {
        Ok(sse) => sse,
        Err(e) => {
            warn!(run_id = %event.run_id, error = %e, "failed to serialize monitor event");
            return true;
        }
    };
    tx.send(Ok(sse)).await.is_ok()
}
