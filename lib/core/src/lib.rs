//! Core domain types shared by every flowloom crate.

pub mod id;

pub use id::{AgentId, JobId, ListenerId, SessionId, UserId, WatchId, WorkflowId, WorkflowRunId};
