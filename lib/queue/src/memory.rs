//! In-process job queue.
//!
//! Used by tests and single-node deployments without NATS. Ordering is
//! priority first, then enqueue order. Fetched jobs stay in flight until
//! acked; a job not settled within the visibility timeout is handed out
//! again with its original run id.

use crate::error::QueueError;
use crate::job::{AckHandle, Delivery, JobQueue, QueueJob};
use async_trait::async_trait;
use chrono::Utc;
use flowloom_core::JobId;
use rootcause::Report;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

struct Entry {
    seq: u64,
    job: QueueJob,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // max-heap: highest priority, then lowest sequence number
    fn cmp(&self, other: &Self) -> Ordering {
        self.job
            .priority
            .cmp(&other.job.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct InFlight {
    job: QueueJob,
    lease: u64,
    deadline: Instant,
}

#[derive(Default)]
struct State {
    ready: BinaryHeap<Entry>,
    delayed: Vec<QueueJob>,
    in_flight: HashMap<JobId, InFlight>,
    seq: u64,
}

impl State {
    fn enqueue(&mut self, job: QueueJob) {
        if job.is_ready() {
            self.seq += 1;
            self.ready.push(Entry { seq: self.seq, job });
        } else {
            self.delayed.push(job);
        }
    }

    fn promote_delayed(&mut self) {
        let now = Utc::now();
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.delayed)
            .into_iter()
            .partition(|job| job.available_at <= now);
        self.delayed = waiting;
        let mut due = due;
        due.sort_by_key(|job| job.available_at);
        for job in due {
            self.seq += 1;
            self.ready.push(Entry { seq: self.seq, job });
        }
    }

    fn reclaim_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<JobId> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(flight) = self.in_flight.remove(&id) {
                debug!(job_id = %id, run_id = %flight.job.run_id, "visibility timeout expired, redelivering");
                self.enqueue(flight.job);
            }
        }
    }
}

/// A job queue held in memory.
#[derive(Clone)]
pub struct InMemoryJobQueue {
    state: Arc<Mutex<State>>,
    visibility_timeout: Duration,
}

impl InMemoryJobQueue {
    #[must_use]
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            visibility_timeout,
        }
    }

    /// Jobs waiting to be fetched, including delayed ones.
    pub async fn pending(&self) -> usize {
        let state = self.state.lock().await;
        state.ready.len() + state.delayed.len()
    }

    /// Jobs fetched but not yet settled.
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }
}

impl std::fmt::Debug for InMemoryJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryJobQueue")
            .field("visibility_timeout", &self.visibility_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn push(&self, job: QueueJob) -> Result<(), Report<QueueError>> {
        debug!(job_id = %job.id, priority = %job.priority, "job enqueued");
        self.state.lock().await.enqueue(job);
        Ok(())
    }

    async fn fetch(&self) -> Result<Option<Delivery>, Report<QueueError>> {
        let mut state = self.state.lock().await;
        state.reclaim_expired();
        state.promote_delayed();

        let Some(Entry { mut job, .. }) = state.ready.pop() else {
            return Ok(None);
        };
        job.attempts += 1;
        state.seq += 1;
        let lease = state.seq;
        state.in_flight.insert(
            job.id,
            InFlight {
                job: job.clone(),
                lease,
                deadline: Instant::now() + self.visibility_timeout,
            },
        );

        let handle = MemoryAck {
            state: Arc::clone(&self.state),
            job_id: job.id,
            lease,
        };
        Ok(Some(Delivery::new(job, Box::new(handle))))
    }
}

struct MemoryAck {
    state: Arc<Mutex<State>>,
    job_id: JobId,
    lease: u64,
}

impl MemoryAck {
    /// Removes the in-flight entry if this handle still owns it.
    fn take(&self, state: &mut State) -> Option<QueueJob> {
        let owned = state
            .in_flight
            .get(&self.job_id)
            .is_some_and(|f| f.lease == self.lease);
        if !owned {
            debug!(job_id = %self.job_id, "stale settlement ignored, job was redelivered");
            return None;
        }
        state.in_flight.remove(&self.job_id).map(|f| f.job)
    }
}

#[async_trait]
impl AckHandle for MemoryAck {
    async fn ack(self: Box<Self>) -> Result<(), Report<QueueError>> {
        let mut state = self.state.lock().await;
        self.take(&mut state);
        Ok(())
    }

    async fn retry(self: Box<Self>, delay: Duration) -> Result<(), Report<QueueError>> {
        let mut state = self.state.lock().await;
        if let Some(mut job) = self.take(&mut state) {
            job.available_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
            state.enqueue(job);
        }
        Ok(())
    }
}
