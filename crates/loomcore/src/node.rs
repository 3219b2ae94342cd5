use crate::credentials::Credentials;
use crate::error::NodeError;
use crate::events::EventEmitter;
use crate::item::{Item, ItemRef};
use crate::workflow::{NodeId, PortName, MAIN_PORT};
use async_trait::async_trait;
use std::collections::HashMap;

/// Core trait implemented by every step type.
///
/// Implementations are supplied by the node registry; the engine depends only
/// on this interface. Implementations must observe `ctx.cancellation` for any
/// long-running work.
#[async_trait]
pub trait Node: Send + Sync {
    /// Unique type identifier (e.g., "flow.if", "transform.set")
    fn node_type(&self) -> &str;

    /// Output ports this node may emit on. A declared port the node leaves
    /// unpopulated is resolved as skipped so downstream readiness settles.
    fn output_ports(&self) -> Vec<PortName> {
        vec![MAIN_PORT.to_string()]
    }

    /// Execute the node with given context
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;

    /// Optional: validate parameters when the node instance is created
    fn validate_parameters(
        &self,
        _parameters: &HashMap<String, serde_json::Value>,
    ) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Execution context passed to each node attempt
pub struct NodeContext {
    /// Id of the node instance being executed
    pub node_id: NodeId,

    /// Input items per input port, merged in connection-declaration order
    pub inputs: HashMap<PortName, Vec<ItemRef>>,

    /// Static parameters from the node's spec
    pub parameters: HashMap<String, serde_json::Value>,

    /// Credentials resolved for this node, if its spec references any
    pub credentials: Option<Credentials>,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Cancellation token for cooperative shutdown
    pub cancellation: tokio_util::sync::CancellationToken,
}

impl NodeContext {
    /// Items on one input port; empty if the port received nothing.
    pub fn items(&self, port: &str) -> &[ItemRef] {
        self.inputs.get(port).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Items across all input ports, in port-name order for determinism.
    pub fn all_items(&self) -> Vec<ItemRef> {
        let mut ports: Vec<&PortName> = self.inputs.keys().collect();
        ports.sort();
        ports
            .into_iter()
            .flat_map(|port| self.inputs[port].iter().cloned())
            .collect()
    }

    pub fn first_item(&self, port: &str) -> Result<&ItemRef, NodeError> {
        self.items(port)
            .first()
            .ok_or_else(|| NodeError::MissingInput(port.to_string()))
    }

    /// Get required parameter or return error
    pub fn require_parameter(&self, name: &str) -> Result<&serde_json::Value, NodeError> {
        self.parameters
            .get(name)
            .ok_or_else(|| NodeError::InvalidParameter {
                name: name.to_string(),
                reason: "missing".to_string(),
            })
    }

    /// Get parameter with default
    pub fn parameter_or(&self, name: &str, default: serde_json::Value) -> serde_json::Value {
        self.parameters.get(name).cloned().unwrap_or(default)
    }

    pub fn string_parameter(&self, name: &str) -> Result<&str, NodeError> {
        self.require_parameter(name)?
            .as_str()
            .ok_or_else(|| NodeError::InvalidParameter {
                name: name.to_string(),
                reason: "expected a string".to_string(),
            })
    }
}

/// Output from one node execution: items per activated output port.
///
/// Ports absent from the map are treated as not activated; the runner marks
/// them skipped. An explicit empty item list counts as produced-but-empty and
/// does not skip downstream nodes.
#[derive(Debug, Clone, Default)]
pub struct NodeOutput {
    pub ports: HashMap<PortName, Vec<Item>>,
}

impl NodeOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Single item on the main port
    pub fn single(item: Item) -> Self {
        Self::items(vec![item])
    }

    /// Items on the main port
    pub fn items(items: Vec<Item>) -> Self {
        Self::empty().with_port(MAIN_PORT, items)
    }

    pub fn with_port(mut self, port: impl Into<PortName>, items: Vec<Item>) -> Self {
        self.ports.insert(port.into(), items);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    fn context_with_inputs(inputs: HashMap<PortName, Vec<ItemRef>>) -> NodeContext {
        let bus = EventBus::new(16);
        NodeContext {
            node_id: "n".to_string(),
            inputs,
            parameters: HashMap::new(),
            credentials: None,
            events: bus.create_emitter(Uuid::new_v4(), "n".to_string()),
            cancellation: tokio_util::sync::CancellationToken::new(),
        }
    }

    #[test]
    fn all_items_is_ordered_by_port_name() {
        let mut inputs = HashMap::new();
        inputs.insert(
            "b".to_string(),
            vec![Arc::new(Item::from_json(json!({"n": 2})))],
        );
        inputs.insert(
            "a".to_string(),
            vec![Arc::new(Item::from_json(json!({"n": 1})))],
        );
        let ctx = context_with_inputs(inputs);

        let items = ctx.all_items();
        assert_eq!(items[0].get("n"), Some(&json!(1)));
        assert_eq!(items[1].get("n"), Some(&json!(2)));
    }

    #[test]
    fn missing_port_yields_empty_slice() {
        let ctx = context_with_inputs(HashMap::new());
        assert!(ctx.items("main").is_empty());
        assert!(ctx.first_item("main").is_err());
    }
}
