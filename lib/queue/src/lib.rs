//! Run queue for flowloom.
//!
//! Scheduled, change-driven and API-submitted runs all go through a job
//! queue. Delivery is at-least-once: a job is acknowledged only after the
//! engine has finished the run, and a redelivered job reuses its run id so
//! the run record is overwritten rather than duplicated.

pub mod envelope;
pub mod error;
pub mod job;
pub mod memory;
pub mod nats;
pub mod run_queue;
pub mod source;
pub mod worker;

pub use envelope::Envelope;
pub use error::QueueError;
pub use job::{AckHandle, Delivery, JobOptions, JobPriority, JobQueue, QueueJob};
pub use memory::InMemoryJobQueue;
pub use nats::{NatsJobQueue, NatsQueueConfig};
pub use run_queue::RunQueue;
pub use source::{InMemoryWorkflowSource, WorkflowSource};
pub use worker::{QueueWorker, WorkerConfig};
