//! Error types for the queue crate.

use std::fmt;

/// Errors from queue backends and the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Could not connect to or set up the backend.
    Connection { message: String },
    /// A job could not be published.
    Publish { message: String },
    /// Fetching the next job failed.
    Fetch { message: String },
    /// Acknowledging or returning a job failed.
    Ack { message: String },
    /// A job could not be encoded or decoded.
    Serialization { message: String },
    /// The pending run record could not be written.
    RunStore { message: String },
    /// Loading a workflow graph failed.
    WorkflowSource { message: String },
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection { message } => write!(f, "queue connection failed: {message}"),
            Self::Publish { message } => write!(f, "job publish failed: {message}"),
            Self::Fetch { message } => write!(f, "job fetch failed: {message}"),
            Self::Ack { message } => write!(f, "job acknowledgement failed: {message}"),
            Self::Serialization { message } => write!(f, "job serialization failed: {message}"),
            Self::RunStore { message } => write!(f, "run record write failed: {message}"),
            Self::WorkflowSource { message } => write!(f, "workflow lookup failed: {message}"),
        }
    }
}

impl std::error::Error for QueueError {}
