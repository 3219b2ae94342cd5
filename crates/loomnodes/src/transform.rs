use async_trait::async_trait;
use loomcore::{Item, Node, NodeContext, NodeError, NodeOutput};
use loomruntime::{NodeFactory, NodeTypeInfo};
use std::collections::HashMap;

/// Sets or overwrites fields on every incoming item.
///
/// Parameters: `values`, an object whose entries are written onto each
/// item's record.
pub struct SetNode;

#[async_trait]
impl Node for SetNode {
    fn node_type(&self) -> &str {
        "transform.set"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let values = ctx
            .require_parameter("values")?
            .as_object()
            .ok_or_else(|| NodeError::InvalidParameter {
                name: "values".to_string(),
                reason: "expected an object".to_string(),
            })?
            .clone();

        let items: Vec<Item> = ctx
            .all_items()
            .iter()
            .map(|item| {
                let mut json = item.json.clone();
                for (key, value) in &values {
                    json.insert(key.clone(), value.clone());
                }
                Item {
                    json,
                    binary: item.binary.clone(),
                }
            })
            .collect();

        Ok(NodeOutput::items(items))
    }

    fn validate_parameters(
        &self,
        parameters: &HashMap<String, serde_json::Value>,
    ) -> Result<(), NodeError> {
        match parameters.get("values") {
            Some(value) if value.is_object() => Ok(()),
            Some(_) => Err(NodeError::InvalidParameter {
                name: "values".to_string(),
                reason: "expected an object".to_string(),
            }),
            None => Err(NodeError::InvalidParameter {
                name: "values".to_string(),
                reason: "missing".to_string(),
            }),
        }
    }
}

pub struct SetNodeFactory;

impl NodeFactory for SetNodeFactory {
    fn create(
        &self,
        _parameters: &HashMap<String, serde_json::Value>,
    ) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(SetNode))
    }

    fn node_type(&self) -> &str {
        "transform.set"
    }

    fn info(&self) -> NodeTypeInfo {
        NodeTypeInfo {
            description: "Sets fields on every item".to_string(),
            category: "transform".to_string(),
        }
    }
}
