use loomcore::{ItemRef, NodeId, PortName, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Resolution state of one (node, output port) slot.
#[derive(Debug, Clone)]
pub enum PortState {
    /// The node emitted on this port. The list may be empty; produced-empty
    /// is not the same as skipped.
    Produced(Arc<Vec<ItemRef>>),
    /// The port was explicitly not activated (e.g. the untaken branch of a
    /// conditional). Downstream readiness treats it as resolved-but-empty.
    Skipped,
}

impl PortState {
    pub fn items(&self) -> Option<&Arc<Vec<ItemRef>>> {
        match self {
            PortState::Produced(items) => Some(items),
            PortState::Skipped => None,
        }
    }
}

/// Thread-safe map of per-node, per-output-port produced payloads.
///
/// Each slot is written exactly once per execution; a second write for the
/// same (node, port) is a programming error. The lock only guards the map
/// itself, never a node's execution.
#[derive(Default)]
pub struct DataFlowStore {
    slots: Mutex<HashMap<(NodeId, PortName), PortState>>,
}

impl DataFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the output of one node's one port.
    pub fn put(&self, node: &str, port: &str, items: Vec<ItemRef>) -> Result<(), StoreError> {
        self.write(node, port, PortState::Produced(Arc::new(items)))
    }

    /// Record that a port was explicitly not activated.
    pub fn mark_skipped(&self, node: &str, port: &str) -> Result<(), StoreError> {
        self.write(node, port, PortState::Skipped)
    }

    /// Resolution state of a slot; `None` means nothing was recorded yet.
    pub fn get(&self, node: &str, port: &str) -> Option<PortState> {
        self.slots
            .lock()
            .unwrap()
            .get(&(node.to_string(), port.to_string()))
            .cloned()
    }

    /// Whether the slot has been resolved, either produced or skipped.
    pub fn is_resolved(&self, node: &str, port: &str) -> bool {
        self.get(node, port).is_some()
    }

    fn write(&self, node: &str, port: &str, state: PortState) -> Result<(), StoreError> {
        let key = (node.to_string(), port.to_string());
        let mut slots = self.slots.lock().unwrap();
        if slots.contains_key(&key) {
            return Err(StoreError::DuplicateWrite {
                node: key.0,
                port: key.1,
            });
        }
        slots.insert(key, state);
        Ok(())
    }
}
