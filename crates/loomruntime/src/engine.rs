use crate::graph::ExecutionGraph;
use crate::orchestrator::Orchestrator;
use crate::registry::NodeRegistry;
use crate::store::DataFlowStore;
use loomcore::{
    share_items, CredentialProvider, EngineError, EventBus, Execution, ExecutionEvent, ExecutionId,
    ExecutionMode, Item, NodeRunState, NullSink, PersistenceSink, RegistryError, StaticCredentials,
    WorkflowDefinition,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// Main entry point for running workflows.
///
/// Holds the node registry and the external collaborators (credential
/// provider, persistence sink, event bus); each started execution gets its
/// own graph, data flow store, and supervising task, so concurrent
/// executions share no engine-internal state beyond these Arcs.
pub struct Engine {
    registry: Arc<NodeRegistry>,
    bus: Arc<EventBus>,
    credentials: Arc<dyn CredentialProvider>,
    sink: Arc<dyn PersistenceSink>,
    config: EngineConfig,
    executions: RwLock<HashMap<ExecutionId, ExecutionEntry>>,
}

struct ExecutionEntry {
    snapshot: Arc<RwLock<Execution>>,
    cancellation: CancellationToken,
}

impl Engine {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(registry: Arc<NodeRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            bus: Arc::new(EventBus::new(config.event_buffer_size)),
            credentials: Arc::new(StaticCredentials::new()),
            sink: Arc::new(NullSink),
            config,
            executions: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = provider;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.bus.subscribe()
    }

    /// Start executing a workflow; returns immediately, the execution
    /// proceeds asynchronously on its own supervising task.
    ///
    /// Structural defects in the definition and unknown node types fail here,
    /// before anything runs.
    pub fn start_execution(
        &self,
        def: WorkflowDefinition,
        trigger: Vec<Item>,
        mode: ExecutionMode,
    ) -> Result<ExecutionHandle, EngineError> {
        let graph = Arc::new(ExecutionGraph::build(&def)?);
        for spec in &def.nodes {
            if !self.registry.contains(&spec.node_type) {
                return Err(RegistryError::UnknownNodeType(spec.node_type.clone()).into());
            }
        }

        let execution = Execution::new(def.id, mode);
        let execution_id = execution.id;
        let snapshot = Arc::new(RwLock::new(execution.clone()));
        let cancellation = CancellationToken::new();
        let node_states = def
            .nodes
            .iter()
            .map(|node| (node.id.clone(), NodeRunState::new(node.id.clone())))
            .collect();

        let orchestrator = Orchestrator {
            graph,
            store: Arc::new(DataFlowStore::new()),
            registry: Arc::clone(&self.registry),
            credentials: Arc::clone(&self.credentials),
            sink: Arc::clone(&self.sink),
            bus: Arc::clone(&self.bus),
            settings: def.settings.clone(),
            execution,
            snapshot: Arc::clone(&snapshot),
            cancellation: cancellation.clone(),
            trigger: Arc::new(share_items(trigger)),
            grace: Duration::from_millis(self.config.shutdown_grace_ms),
            node_states,
        };
        let supervisor = tokio::spawn(orchestrator.run());

        self.executions.write().unwrap().insert(
            execution_id,
            ExecutionEntry {
                snapshot: Arc::clone(&snapshot),
                cancellation: cancellation.clone(),
            },
        );

        Ok(ExecutionHandle {
            execution_id,
            snapshot,
            cancellation,
            supervisor,
        })
    }

    /// Request cancellation of a running execution. In-flight nodes observe
    /// their context and unwind; completed node outputs are preserved.
    pub fn cancel(&self, execution_id: ExecutionId) -> Result<(), EngineError> {
        let executions = self.executions.read().unwrap();
        let entry = executions
            .get(&execution_id)
            .ok_or(EngineError::ExecutionNotFound(execution_id))?;
        entry.cancellation.cancel();
        Ok(())
    }

    /// Latest snapshot of an execution, including after it finished.
    pub fn get_status(&self, execution_id: ExecutionId) -> Option<Execution> {
        self.executions
            .read()
            .unwrap()
            .get(&execution_id)
            .map(|entry| entry.snapshot.read().unwrap().clone())
    }
}

/// Configuration for the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity of the event broadcast channel.
    pub event_buffer_size: usize,
    /// How long an abort waits for in-flight nodes before giving up on them.
    pub shutdown_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1024,
            shutdown_grace_ms: 2000,
        }
    }
}

/// Handle for one started execution
pub struct ExecutionHandle {
    pub execution_id: ExecutionId,
    snapshot: Arc<RwLock<Execution>>,
    cancellation: CancellationToken,
    supervisor: JoinHandle<()>,
}

impl ExecutionHandle {
    /// Current snapshot of the execution
    pub fn status(&self) -> Execution {
        self.snapshot.read().unwrap().clone()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Wait for the execution to reach a terminal status
    pub async fn wait(self) -> Execution {
        let _ = self.supervisor.await;
        let status = self.snapshot.read().unwrap().clone();
        status
    }
}
