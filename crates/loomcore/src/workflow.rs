use crate::credentials::CredentialRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

pub type WorkflowId = Uuid;

/// Node ids are caller-chosen strings, unique within a workflow.
pub type NodeId = String;

/// Name of an input or output slot on a node.
pub type PortName = String;

/// The port used when a node does not route on anything more specific.
pub const MAIN_PORT: &str = "main";

/// Complete workflow definition: the declarative graph the engine executes.
///
/// Immutable for the duration of an execution. Structural validation (unknown
/// node references, self-loops, cycles) happens when the runtime builds its
/// execution graph from this definition, before anything runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub name: String,
    pub nodes: Vec<NodeSpec>,
    pub connections: Vec<ConnectionSpec>,
    pub settings: WorkflowSettings,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            nodes: Vec::new(),
            connections: Vec::new(),
            settings: WorkflowSettings::default(),
        }
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Connect one node's output port to another node's input port.
    ///
    /// Connection declaration order is meaningful: when several connections
    /// feed the same input port, their items are merged in this order.
    pub fn connect(
        &mut self,
        source_node: impl Into<NodeId>,
        source_port: impl Into<PortName>,
        target_node: impl Into<NodeId>,
        target_port: impl Into<PortName>,
    ) {
        self.connections.push(ConnectionSpec {
            source_node: source_node.into(),
            source_port: source_port.into(),
            target_node: target_node.into(),
            target_port: target_port.into(),
        });
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Node specification in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    pub node_type: String,
    pub name: Option<String>,
    pub parameters: HashMap<String, serde_json::Value>,
    pub credential: Option<CredentialRef>,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub continue_on_fail: bool,
    pub timeout_ms: Option<u64>,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: None,
            parameters: HashMap::new(),
            credential: None,
            max_retries: 0,
            retry_delay_ms: 1000,
            continue_on_fail: false,
            timeout_ms: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_parameter(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_credential(mut self, reference: impl Into<CredentialRef>) -> Self {
        self.credential = Some(reference.into());
        self
    }

    pub fn with_retries(mut self, max_retries: u32, delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = delay_ms;
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn continue_on_fail(mut self) -> Self {
        self.continue_on_fail = true;
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Directed data link from one node's output port to another node's input port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    pub source_node: NodeId,
    pub source_port: PortName,
    pub target_node: NodeId,
    pub target_port: PortName,
}

/// Global workflow settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Upper bound on concurrently running nodes within one execution.
    pub max_parallel_nodes: usize,
    /// Wall-clock budget for the whole execution; `None` means unbounded.
    pub max_execution_time_ms: Option<u64>,
    /// Multiplier applied to a node's retry delay on each successive attempt.
    pub backoff_factor: f64,
    /// Ceiling on any single computed retry delay.
    pub max_retry_delay_ms: u64,
}

impl WorkflowSettings {
    pub fn max_execution_time(&self) -> Option<Duration> {
        self.max_execution_time_ms.map(Duration::from_millis)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_parallel_nodes: 10,
            max_execution_time_ms: None,
            backoff_factor: 2.0,
            max_retry_delay_ms: 30_000,
        }
    }
}
