use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Shared handle to an item.
///
/// Items are never mutated after a node emits them; downstream nodes receive
/// read-only views through this handle.
pub type ItemRef = Arc<Item>;

/// A unit of payload flowing along a connection: a key/value record plus
/// optional binary attachments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub json: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub binary: HashMap<String, Binary>,
}

impl Item {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an item from any JSON value. Objects become the item record
    /// directly; anything else lands under a `"data"` key.
    pub fn from_json(value: serde_json::Value) -> Self {
        let json = match value {
            serde_json::Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        Self {
            json,
            binary: HashMap::new(),
        }
    }

    pub fn with_field(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.json.insert(key.into(), value.into());
        self
    }

    pub fn with_binary(mut self, key: impl Into<String>, binary: Binary) -> Self {
        self.binary.insert(key.into(), binary);
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.json.get(key)
    }
}

/// Binary attachment on an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binary {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub file_name: Option<String>,
}

impl Binary {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
            file_name: None,
        }
    }
}

/// Wrap freshly produced items into shared read-only handles.
pub fn share_items(items: Vec<Item>) -> Vec<ItemRef> {
    items.into_iter().map(Arc::new).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_wraps_scalars_under_data() {
        let item = Item::from_json(json!(42));
        assert_eq!(item.get("data"), Some(&json!(42)));
    }

    #[test]
    fn from_json_keeps_objects_flat() {
        let item = Item::from_json(json!({"x": 1}));
        assert_eq!(item.get("x"), Some(&json!(1)));
        assert!(item.get("data").is_none());
    }
}
