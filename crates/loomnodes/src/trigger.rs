use async_trait::async_trait;
use loomcore::{Node, NodeContext, NodeError, NodeOutput, MAIN_PORT};
use loomruntime::{NodeFactory, NodeTypeInfo};
use std::collections::HashMap;

/// Entry point of a workflow: forwards the trigger payload downstream.
pub struct StartNode;

#[async_trait]
impl Node for StartNode {
    fn node_type(&self) -> &str {
        "flow.start"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let items = ctx
            .items(MAIN_PORT)
            .iter()
            .map(|item| item.as_ref().clone())
            .collect();
        Ok(NodeOutput::items(items))
    }
}

pub struct StartNodeFactory;

impl NodeFactory for StartNodeFactory {
    fn create(
        &self,
        _parameters: &HashMap<String, serde_json::Value>,
    ) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(StartNode))
    }

    fn node_type(&self) -> &str {
        "flow.start"
    }

    fn info(&self) -> NodeTypeInfo {
        NodeTypeInfo {
            description: "Passes the trigger payload into the workflow".to_string(),
            category: "flow".to_string(),
        }
    }
}
