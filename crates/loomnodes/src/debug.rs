use async_trait::async_trait;
use loomcore::{Node, NodeContext, NodeError, NodeOutput};
use loomruntime::{NodeFactory, NodeTypeInfo};
use std::collections::HashMap;

/// Logs every incoming item and passes it through unchanged.
pub struct DebugNode;

#[async_trait]
impl Node for DebugNode {
    fn node_type(&self) -> &str {
        "debug.log"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let items = ctx.all_items();
        ctx.events
            .info(format!("{} item(s) passing through", items.len()));
        for item in &items {
            tracing::debug!(node = %ctx.node_id, item = %serde_json::Value::Object(item.json.clone()));
        }
        Ok(NodeOutput::items(
            items.iter().map(|item| item.as_ref().clone()).collect(),
        ))
    }
}

pub struct DebugNodeFactory;

impl NodeFactory for DebugNodeFactory {
    fn create(
        &self,
        _parameters: &HashMap<String, serde_json::Value>,
    ) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(DebugNode))
    }

    fn node_type(&self) -> &str {
        "debug.log"
    }

    fn info(&self) -> NodeTypeInfo {
        NodeTypeInfo {
            description: "Logs items for debugging".to_string(),
            category: "debug".to_string(),
        }
    }
}
