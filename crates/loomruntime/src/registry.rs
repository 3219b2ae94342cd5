use loomcore::{Node, NodeError, RegistryError};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating node instances
pub trait NodeFactory: Send + Sync {
    /// Create a new instance of the node with given parameters
    fn create(
        &self,
        parameters: &HashMap<String, serde_json::Value>,
    ) -> Result<Box<dyn Node>, NodeError>;

    /// Node type identifier this factory produces
    fn node_type(&self) -> &str;

    /// Optional: human-readable information about the node type
    fn info(&self) -> NodeTypeInfo {
        NodeTypeInfo::default()
    }
}

/// Descriptive metadata about a registered node type
#[derive(Debug, Clone)]
pub struct NodeTypeInfo {
    pub description: String,
    pub category: String,
}

impl Default for NodeTypeInfo {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Registry of available node types.
///
/// The engine depends only on the `Node` interface; concrete node types are
/// supplied here by the embedding application.
#[derive(Default)]
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node factory
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let node_type = factory.node_type().to_string();
        tracing::info!("registering node type: {}", node_type);
        self.factories.insert(node_type, factory);
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    /// Create a node instance and validate its parameters
    pub fn create_node(
        &self,
        node_type: &str,
        parameters: &HashMap<String, serde_json::Value>,
    ) -> Result<Box<dyn Node>, RegistryError> {
        let factory = self
            .factories
            .get(node_type)
            .ok_or_else(|| RegistryError::UnknownNodeType(node_type.to_string()))?;

        let node = factory
            .create(parameters)
            .map_err(|e| RegistryError::InvalidNode(format!("{}: {}", node_type, e)))?;
        node.validate_parameters(parameters)
            .map_err(|e| RegistryError::InvalidNode(format!("{}: {}", node_type, e)))?;
        Ok(node)
    }

    /// All registered node types
    pub fn list_node_types(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn info(&self, node_type: &str) -> Option<NodeTypeInfo> {
        self.factories.get(node_type).map(|f| f.info())
    }
}
