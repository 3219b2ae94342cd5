use crate::graph::ExecutionGraph;
use crate::registry::NodeRegistry;
use crate::runner::{NodeRunOutcome, NodeRunner};
use crate::store::{DataFlowStore, PortState};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use loomcore::{
    CredentialProvider, EventBus, Execution, ExecutionEvent, ExecutionStatus, ItemRef, NodeError,
    NodeId, NodeRunState, NodeRunStatus, PersistenceSink, WorkflowSettings,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Supervises one in-flight execution: computes ready nodes, dispatches them
/// to worker tasks, tracks completion, skip, and failure, and decides the
/// terminal status.
///
/// One supervising task per execution. The orchestrator owns the node run
/// states outright; worker tasks report back over the completion stream, so
/// the only mutable state shared with workers is the data flow store.
pub(crate) struct Orchestrator {
    pub(crate) graph: Arc<ExecutionGraph>,
    pub(crate) store: Arc<DataFlowStore>,
    pub(crate) registry: Arc<NodeRegistry>,
    pub(crate) credentials: Arc<dyn CredentialProvider>,
    pub(crate) sink: Arc<dyn PersistenceSink>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) settings: WorkflowSettings,
    pub(crate) execution: Execution,
    pub(crate) snapshot: Arc<RwLock<Execution>>,
    pub(crate) cancellation: CancellationToken,
    pub(crate) trigger: Arc<Vec<ItemRef>>,
    pub(crate) grace: Duration,
    pub(crate) node_states: HashMap<NodeId, NodeRunState>,
}

/// What woke the supervising loop
enum Wakeup {
    Finished(Result<NodeRunOutcome, tokio::task::JoinError>),
    Cancelled,
    DeadlineExpired,
}

impl Orchestrator {
    pub(crate) async fn run(mut self) {
        let deadline = self
            .settings
            .max_execution_time()
            .map(|budget| Instant::now() + budget);
        let cancellation = self.cancellation.clone();
        let mut in_flight: FuturesUnordered<JoinHandle<NodeRunOutcome>> = FuturesUnordered::new();

        tracing::info!(
            execution = %self.execution.id,
            workflow = %self.execution.workflow_id,
            nodes = self.graph.len(),
            "starting execution"
        );
        self.bus.emit(ExecutionEvent::ExecutionStarted {
            execution_id: self.execution.id,
            workflow_id: self.execution.workflow_id,
            mode: self.execution.mode,
            timestamp: Utc::now(),
        });
        for state in self.node_states.values() {
            self.sink.node_changed(self.execution.id, state);
        }

        let final_status = 'supervise: loop {
            // Check the budget first so an expired deadline is never
            // misread as a deadlock or a clean finish.
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline && !self.all_terminal() {
                    tracing::warn!(execution = %self.execution.id, "execution budget exhausted");
                    break self.abort(&mut in_flight, ExecutionStatus::Timeout).await;
                }
            }

            self.propagate_skips();

            for node_id in self.ready_nodes() {
                if in_flight.len() >= self.settings.max_parallel_nodes {
                    break;
                }
                match self.dispatch(&node_id, deadline) {
                    Ok(task) => in_flight.push(task),
                    Err(message) => {
                        self.fail_node(&node_id, 0, &message);
                        self.execution.fail(node_id.clone(), message);
                        break 'supervise self.abort(&mut in_flight, ExecutionStatus::Error).await;
                    }
                }
            }

            if in_flight.is_empty() {
                if self.all_terminal() {
                    break ExecutionStatus::Success;
                }
                // A graph defect escaped validation (e.g. a connection from a
                // port no node ever resolves). Never silently retried.
                let message = "no runnable nodes but execution is not complete";
                tracing::error!(execution = %self.execution.id, "deadlock: {}", message);
                self.execution.fail_structural(message);
                break ExecutionStatus::Error;
            }

            // The select only picks what woke us; acting on it happens after,
            // once the borrows on `in_flight` are released.
            let wakeup = tokio::select! {
                Some(joined) = in_flight.next() => Wakeup::Finished(joined),
                _ = cancellation.cancelled() => Wakeup::Cancelled,
                _ = async { sleep_until(deadline.unwrap()).await }, if deadline.is_some() => {
                    Wakeup::DeadlineExpired
                }
            };

            match wakeup {
                Wakeup::Finished(Ok(outcome)) => {
                    if self.record_outcome(outcome, true) {
                        break self.abort(&mut in_flight, ExecutionStatus::Error).await;
                    }
                }
                Wakeup::Finished(Err(join_err)) => {
                    tracing::error!(
                        execution = %self.execution.id,
                        error = %join_err,
                        "node task panicked"
                    );
                    self.execution
                        .fail_structural(format!("node task panicked: {join_err}"));
                    break self.abort(&mut in_flight, ExecutionStatus::Error).await;
                }
                Wakeup::Cancelled => {
                    break self.abort(&mut in_flight, ExecutionStatus::Cancelled).await;
                }
                Wakeup::DeadlineExpired => {
                    tracing::warn!(execution = %self.execution.id, "execution budget exhausted");
                    break self.abort(&mut in_flight, ExecutionStatus::Timeout).await;
                }
            }
        };

        self.finish(final_status);
    }

    /// Nodes whose every incoming (source, port) slot has resolved and that
    /// have not started yet. Marked Ready here; dispatch may lag behind when
    /// the worker pool is full.
    fn ready_nodes(&mut self) -> Vec<NodeId> {
        let mut ready = Vec::new();
        for node_id in self.graph.topological_order() {
            let Some(state) = self.node_states.get(node_id) else {
                continue;
            };
            if !matches!(state.status, NodeRunStatus::Pending | NodeRunStatus::Ready) {
                continue;
            }
            let resolved = self
                .graph
                .incoming(node_id)
                .iter()
                .all(|conn| self.store.is_resolved(&conn.source_node, &conn.source_port));
            if resolved {
                ready.push(node_id.clone());
            }
        }
        for node_id in &ready {
            if let Some(state) = self.node_states.get_mut(node_id) {
                state.mark_ready();
            }
        }
        ready
    }

    /// A node whose every incoming connection resolved to skipped is itself
    /// skipped without running; its outgoing ports are then marked skipped so
    /// the cascade settles. Root nodes are never auto-skipped. A node with a
    /// mix of skipped and produced inputs runs with whatever resolved.
    fn propagate_skips(&mut self) {
        loop {
            let mut skipped_now = Vec::new();
            for node_id in self.graph.topological_order() {
                let Some(state) = self.node_states.get(node_id) else {
                    continue;
                };
                if state.status != NodeRunStatus::Pending {
                    continue;
                }
                let incoming = self.graph.incoming(node_id);
                if incoming.is_empty() {
                    continue;
                }
                let all_skipped = incoming.iter().all(|conn| {
                    matches!(
                        self.store.get(&conn.source_node, &conn.source_port),
                        Some(PortState::Skipped)
                    )
                });
                if all_skipped {
                    skipped_now.push(node_id.clone());
                }
            }
            if skipped_now.is_empty() {
                return;
            }
            for node_id in skipped_now {
                self.skip_node(&node_id);
            }
        }
    }

    fn skip_node(&mut self, node_id: &str) {
        tracing::debug!(execution = %self.execution.id, node = %node_id, "node skipped");
        if let Some(state) = self.node_states.get_mut(node_id) {
            state.skip();
            self.sink.node_changed(self.execution.id, state);
        }
        self.bus.emit(ExecutionEvent::NodeSkipped {
            execution_id: self.execution.id,
            node_id: node_id.to_string(),
            timestamp: Utc::now(),
        });

        let mut seen_ports = HashSet::new();
        for conn in self.graph.outgoing(node_id) {
            if seen_ports.insert(conn.source_port.clone()) {
                if let Err(e) = self.store.mark_skipped(node_id, &conn.source_port) {
                    tracing::error!(node = %node_id, error = %e, "skip write rejected");
                }
            }
        }
    }

    fn dispatch(
        &mut self,
        node_id: &str,
        deadline: Option<Instant>,
    ) -> Result<JoinHandle<NodeRunOutcome>, String> {
        let spec = self
            .graph
            .node(node_id)
            .cloned()
            .ok_or_else(|| format!("unknown node in graph: {node_id}"))?;
        let node = self
            .registry
            .create_node(&spec.node_type, &spec.parameters)
            .map_err(|e| e.to_string())?;

        if self.execution.status == ExecutionStatus::Waiting {
            self.execution.start();
            self.publish_execution();
        }

        tracing::debug!(
            execution = %self.execution.id,
            node = %node_id,
            node_type = %spec.node_type,
            "dispatching node"
        );
        if let Some(state) = self.node_states.get_mut(node_id) {
            state.mark_running();
            self.sink.node_changed(self.execution.id, state);
        }

        let runner = NodeRunner {
            execution_id: self.execution.id,
            graph: Arc::clone(&self.graph),
            store: Arc::clone(&self.store),
            credentials: Arc::clone(&self.credentials),
            bus: Arc::clone(&self.bus),
            settings: self.settings.clone(),
            deadline,
            cancellation: self.cancellation.clone(),
            trigger: Arc::clone(&self.trigger),
        };
        Ok(tokio::spawn(runner.run(spec, node)))
    }

    /// Fold a finished node back into the run state. Returns true when the
    /// failure must abort the execution (only while `escalate` is set; the
    /// drain after an abort records outcomes without escalating again).
    fn record_outcome(&mut self, outcome: NodeRunOutcome, escalate: bool) -> bool {
        match outcome.result {
            Ok(()) => {
                if let Some(state) = self.node_states.get_mut(&outcome.node_id) {
                    state.succeed(outcome.attempts, outcome.recorded_error.clone());
                    self.sink.node_changed(self.execution.id, state);
                }
                match outcome.recorded_error {
                    Some(error) => tracing::info!(
                        execution = %self.execution.id,
                        node = %outcome.node_id,
                        error = %error,
                        "node completed with recorded error"
                    ),
                    None => tracing::info!(
                        execution = %self.execution.id,
                        node = %outcome.node_id,
                        attempts = outcome.attempts,
                        "node completed"
                    ),
                }
                false
            }
            Err(NodeError::Cancelled) => {
                self.fail_node(&outcome.node_id, outcome.attempts, "cancelled");
                false
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(
                    execution = %self.execution.id,
                    node = %outcome.node_id,
                    error = %message,
                    "node failed"
                );
                self.fail_node(&outcome.node_id, outcome.attempts, &message);
                if escalate {
                    self.execution.fail(outcome.node_id, message);
                    return true;
                }
                false
            }
        }
    }

    fn fail_node(&mut self, node_id: &str, attempts: u32, message: &str) {
        if let Some(state) = self.node_states.get_mut(node_id) {
            state.fail(attempts, message);
            self.sink.node_changed(self.execution.id, state);
        }
    }

    /// Stop dispatching, cancel everything in flight, and wait a bounded
    /// grace period for workers to unwind. Outputs of already-completed nodes
    /// are preserved in the store.
    async fn abort(
        &mut self,
        in_flight: &mut FuturesUnordered<JoinHandle<NodeRunOutcome>>,
        status: ExecutionStatus,
    ) -> ExecutionStatus {
        self.cancellation.cancel();

        let grace = self.grace;
        let drain = async {
            while let Some(joined) = in_flight.next().await {
                if let Ok(outcome) = joined {
                    self.record_outcome(outcome, false);
                }
            }
        };
        if timeout(grace, drain).await.is_err() {
            tracing::warn!(
                execution = %self.execution.id,
                "in-flight nodes did not stop within the grace period"
            );
        }

        for state in self.node_states.values_mut() {
            match state.status {
                NodeRunStatus::Running => {
                    state.fail(state.attempt, "stopped before completion");
                    self.sink.node_changed(self.execution.id, state);
                }
                NodeRunStatus::Pending | NodeRunStatus::Ready => {
                    state.skip();
                    self.sink.node_changed(self.execution.id, state);
                }
                _ => {}
            }
        }
        status
    }

    fn all_terminal(&self) -> bool {
        self.node_states
            .values()
            .all(|state| state.status.is_terminal())
    }

    fn finish(&mut self, status: ExecutionStatus) {
        match status {
            ExecutionStatus::Success => self.execution.complete(),
            ExecutionStatus::Cancelled => self.execution.cancel(),
            ExecutionStatus::Timeout => self.execution.timeout(),
            // Error transitions happen at the point of detection.
            _ => {}
        }
        self.publish_execution();
        self.bus.emit(ExecutionEvent::ExecutionFinished {
            execution_id: self.execution.id,
            status: self.execution.status,
            duration_ms: self.execution.duration_ms(),
            timestamp: Utc::now(),
        });
        tracing::info!(
            execution = %self.execution.id,
            status = ?self.execution.status,
            duration_ms = self.execution.duration_ms(),
            "execution finished"
        );
    }

    fn publish_execution(&self) {
        if let Ok(mut snapshot) = self.snapshot.write() {
            *snapshot = self.execution.clone();
        }
        self.sink.execution_changed(&self.execution);
    }
}
