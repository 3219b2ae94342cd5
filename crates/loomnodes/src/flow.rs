use async_trait::async_trait;
use loomcore::{Item, Node, NodeContext, NodeError, NodeOutput, PortName};
use loomruntime::{NodeFactory, NodeTypeInfo};
use std::collections::HashMap;

/// Routes each item to the "true" or "false" output port.
///
/// Parameters: `field` is the record key to test. When `equals` is present
/// the condition is equality against it, otherwise truthiness of the field
/// value. A branch that receives no items stays unpopulated, so
/// everything solely downstream of it is skipped.
pub struct IfNode;

impl IfNode {
    fn condition(value: Option<&serde_json::Value>, equals: Option<&serde_json::Value>) -> bool {
        match (value, equals) {
            (Some(value), Some(expected)) => value == expected,
            (Some(serde_json::Value::Bool(b)), None) => *b,
            (Some(serde_json::Value::Null), None) => false,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

#[async_trait]
impl Node for IfNode {
    fn node_type(&self) -> &str {
        "flow.if"
    }

    fn output_ports(&self) -> Vec<PortName> {
        vec!["true".to_string(), "false".to_string()]
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let field = ctx.string_parameter("field")?;
        let equals = ctx.parameters.get("equals");

        let mut matched: Vec<Item> = Vec::new();
        let mut unmatched: Vec<Item> = Vec::new();
        for item in ctx.all_items() {
            if Self::condition(item.get(field), equals) {
                matched.push(item.as_ref().clone());
            } else {
                unmatched.push(item.as_ref().clone());
            }
        }

        let mut output = NodeOutput::empty();
        if !matched.is_empty() {
            output = output.with_port("true", matched);
        }
        if !unmatched.is_empty() {
            output = output.with_port("false", unmatched);
        }
        Ok(output)
    }

    fn validate_parameters(
        &self,
        parameters: &HashMap<String, serde_json::Value>,
    ) -> Result<(), NodeError> {
        match parameters.get("field") {
            Some(value) if value.is_string() => Ok(()),
            Some(_) => Err(NodeError::InvalidParameter {
                name: "field".to_string(),
                reason: "expected a string".to_string(),
            }),
            None => Err(NodeError::InvalidParameter {
                name: "field".to_string(),
                reason: "missing".to_string(),
            }),
        }
    }
}

pub struct IfNodeFactory;

impl NodeFactory for IfNodeFactory {
    fn create(
        &self,
        _parameters: &HashMap<String, serde_json::Value>,
    ) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(IfNode))
    }

    fn node_type(&self) -> &str {
        "flow.if"
    }

    fn info(&self) -> NodeTypeInfo {
        NodeTypeInfo {
            description: "Routes items to the true/false branch".to_string(),
            category: "flow".to_string(),
        }
    }
}

/// Concatenates the items of every input port, in port-name order.
pub struct MergeNode;

#[async_trait]
impl Node for MergeNode {
    fn node_type(&self) -> &str {
        "flow.merge"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let items = ctx
            .all_items()
            .iter()
            .map(|item| item.as_ref().clone())
            .collect();
        Ok(NodeOutput::items(items))
    }
}

pub struct MergeNodeFactory;

impl NodeFactory for MergeNodeFactory {
    fn create(
        &self,
        _parameters: &HashMap<String, serde_json::Value>,
    ) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(MergeNode))
    }

    fn node_type(&self) -> &str {
        "flow.merge"
    }

    fn info(&self) -> NodeTypeInfo {
        NodeTypeInfo {
            description: "Concatenates all input ports into one stream".to_string(),
            category: "flow".to_string(),
        }
    }
}
