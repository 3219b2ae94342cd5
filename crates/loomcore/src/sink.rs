use crate::execution::{Execution, ExecutionId, NodeRunState};
use std::collections::HashMap;
use std::sync::Mutex;

/// External collaborator receiving execution and node state transitions for
/// durable storage. Calls are fire-and-forget; the engine never reads this
/// state back during a run, and a sink must not fail the run.
pub trait PersistenceSink: Send + Sync {
    fn execution_changed(&self, execution: &Execution);
    fn node_changed(&self, execution_id: ExecutionId, state: &NodeRunState);
}

/// Sink that drops everything; the default when no persistence is wired up.
#[derive(Debug, Default)]
pub struct NullSink;

impl PersistenceSink for NullSink {
    fn execution_changed(&self, _execution: &Execution) {}
    fn node_changed(&self, _execution_id: ExecutionId, _state: &NodeRunState) {}
}

/// In-memory sink recording every transition, for tests and demos.
#[derive(Default)]
pub struct MemorySink {
    executions: Mutex<Vec<Execution>>,
    nodes: Mutex<Vec<(ExecutionId, NodeRunState)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent snapshot recorded for an execution
    pub fn latest_execution(&self, execution_id: ExecutionId) -> Option<Execution> {
        self.executions
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|e| e.id == execution_id)
            .cloned()
    }

    /// Most recent snapshot recorded for a node within an execution
    pub fn latest_node(&self, execution_id: ExecutionId, node_id: &str) -> Option<NodeRunState> {
        self.nodes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, state)| *id == execution_id && state.node_id == node_id)
            .map(|(_, state)| state.clone())
    }

    /// Latest snapshot per node for an execution
    pub fn node_states(&self, execution_id: ExecutionId) -> HashMap<String, NodeRunState> {
        let mut latest = HashMap::new();
        for (id, state) in self.nodes.lock().unwrap().iter() {
            if *id == execution_id {
                latest.insert(state.node_id.clone(), state.clone());
            }
        }
        latest
    }

    pub fn node_history(&self, execution_id: ExecutionId) -> Vec<NodeRunState> {
        self.nodes
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == execution_id)
            .map(|(_, state)| state.clone())
            .collect()
    }
}

impl PersistenceSink for MemorySink {
    fn execution_changed(&self, execution: &Execution) {
        self.executions.lock().unwrap().push(execution.clone());
    }

    fn node_changed(&self, execution_id: ExecutionId, state: &NodeRunState) {
        self.nodes.lock().unwrap().push((execution_id, state.clone()));
    }
}
