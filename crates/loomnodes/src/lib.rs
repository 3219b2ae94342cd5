//! Built-in flow-control and utility nodes
//!
//! Only nodes the engine itself is exercised with live here: triggers,
//! branching, merging, field manipulation, and debugging. Third-party
//! integrations belong to the embedding application.

mod debug;
mod flow;
mod transform;
mod trigger;

pub use debug::{DebugNode, DebugNodeFactory};
pub use flow::{IfNode, IfNodeFactory, MergeNode, MergeNodeFactory};
pub use transform::{SetNode, SetNodeFactory};
pub use trigger::{StartNode, StartNodeFactory};

use loomruntime::NodeRegistry;
use std::sync::Arc;

/// Register every built-in node type
pub fn register_builtins(registry: &mut NodeRegistry) {
    registry.register(Arc::new(StartNodeFactory));
    registry.register(Arc::new(SetNodeFactory));
    registry.register(Arc::new(IfNodeFactory));
    registry.register(Arc::new(MergeNodeFactory));
    registry.register(Arc::new(DebugNodeFactory));
}
