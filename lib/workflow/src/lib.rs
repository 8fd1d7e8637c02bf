//! Workflow orchestration core for flowloom.
//!
//! This crate provides:
//! - The workflow graph model (nodes, edges, topological execution order)
//! - The node executor contract and the registry that dispatches to executors
//! - Typed condition expressions and the built-in branching nodes
//! - The execution engine, run records and run persistence seam
//! - Live monitoring and cooperative cancellation of in-flight runs

pub mod cancellation;
pub mod condition;
pub mod context;
pub mod definition;
pub mod engine;
pub mod error;
pub mod executor;
pub mod graph;
pub mod monitor;
pub mod node;
pub mod nodes;
pub mod registry;
pub mod result;
pub mod run;
pub mod store;

pub use cancellation::ExecutionManager;
pub use condition::{Condition, Operator};
pub use context::ExecutionContext;
pub use definition::{NodeCategory, NodeDefinition, ParameterDefinition, ParameterKind};
pub use engine::{RunOptions, WorkflowEngine};
pub use error::{ConditionError, ConfigurationError, GraphError, RegistryError, RunStoreError};
pub use executor::NodeExecutor;
pub use graph::{GraphSpec, WorkflowGraph};
pub use monitor::{EventSink, ExecutionMonitor, LiveRun, MonitorEvent, MonitorEventType, SinkClosed};
pub use node::{Edge, JsonMap, Node, NodeId};
pub use registry::{NodeRegistry, ValidationReport};
pub use result::ExecutionResult;
pub use run::{RunRecord, RunResult, RunStatus};
pub use store::{InMemoryRunStore, RunStore};
