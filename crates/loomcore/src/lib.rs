//! Core abstractions for the loom workflow engine
//!
//! This crate provides the fundamental types and traits that the runtime and
//! all node implementations depend on: the workflow definition, the item data
//! model, the `Node` contract, execution state machines, the error taxonomy,
//! and the traits for external collaborators (credential provider and
//! persistence sink).

mod credentials;
mod error;
pub mod events;
mod execution;
mod item;
mod node;
mod sink;
mod workflow;

pub use credentials::{CredentialProvider, CredentialRef, Credentials, StaticCredentials};
pub use error::{EngineError, GraphError, NodeError, RegistryError, StoreError};
pub use events::{EventBus, EventEmitter, ExecutionEvent, NodeEvent};
pub use execution::{
    Execution, ExecutionId, ExecutionMode, ExecutionStatus, NodeRunState, NodeRunStatus,
};
pub use item::{share_items, Binary, Item, ItemRef};
pub use node::{Node, NodeContext, NodeOutput};
pub use sink::{MemorySink, NullSink, PersistenceSink};
pub use workflow::{
    ConnectionSpec, NodeId, NodeSpec, PortName, WorkflowDefinition, WorkflowId, WorkflowSettings,
    MAIN_PORT,
};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
