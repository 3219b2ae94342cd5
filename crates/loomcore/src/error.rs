use crate::execution::ExecutionId;
use crate::workflow::NodeId;
use thiserror::Error;

/// Umbrella error for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("node error: {0}")]
    Node(#[from] NodeError),

    #[error("execution not found: {0}")]
    ExecutionNotFound(ExecutionId),
}

/// Structural defects in a workflow definition. Fatal at build time; an
/// execution with any of these never starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("workflow has no nodes")]
    EmptyWorkflow,

    #[error("duplicate node id: {0}")]
    DuplicateNode(NodeId),

    #[error("connection references unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("node connects to itself: {0}")]
    SelfLoop(NodeId),

    #[error("workflow contains a cycle")]
    Cycle,
}

/// Data flow store misuse
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("output for node '{node}' port '{port}' was already written")]
    DuplicateWrite { node: NodeId, port: String },
}

/// Node registry failures
#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    #[error("unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("invalid node: {0}")]
    InvalidNode(String),
}

/// Errors produced while executing a single node
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("missing required input: {0}")]
    MissingInput(String),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("credential error: {0}")]
    Credential(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("node timed out after {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    #[error("execution failed: {0}")]
    Failed(String),

    #[error("cancelled")]
    Cancelled,
}

impl NodeError {
    /// Only transient network/timeout-class failures are worth retrying.
    /// Credential failures, bad parameters, and cancellation are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NodeError::Network(_) | NodeError::Timeout { .. })
    }
}
