//! Built-in node executors.
//!
//! These cover the node kinds the engine itself understands (entry points,
//! data shaping, branching). Executors that talk to external systems live in
//! their own crates and register themselves the same way.

mod logic;
mod set;
mod trigger;

pub use logic::{IfExecutor, SwitchExecutor};
pub use set::SetExecutor;
pub use trigger::{MANUAL_TRIGGER, ManualTriggerExecutor};

use crate::registry::NodeRegistry;

/// Registers every built-in executor.
pub fn register_builtin(registry: &mut NodeRegistry) {
    registry.register(ManualTriggerExecutor);
    registry.register(SetExecutor);
    registry.register(IfExecutor);
    registry.register(SwitchExecutor);
}
