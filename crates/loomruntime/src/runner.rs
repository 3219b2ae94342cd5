use crate::graph::ExecutionGraph;
use crate::store::{DataFlowStore, PortState};
use chrono::Utc;
use loomcore::{
    share_items, CredentialProvider, Credentials, EventBus, ExecutionEvent, ExecutionId, Item,
    ItemRef, Node, NodeContext, NodeError, NodeOutput, NodeSpec, PortName, StoreError,
    WorkflowSettings, MAIN_PORT,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Executes one node instance: input assembly, credential resolution,
/// per-attempt timeout, retry with backoff, continue-on-fail handling, and
/// writing outputs into the data flow store.
pub(crate) struct NodeRunner {
    pub(crate) execution_id: ExecutionId,
    pub(crate) graph: Arc<ExecutionGraph>,
    pub(crate) store: Arc<DataFlowStore>,
    pub(crate) credentials: Arc<dyn CredentialProvider>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) settings: WorkflowSettings,
    pub(crate) deadline: Option<Instant>,
    pub(crate) cancellation: CancellationToken,
    pub(crate) trigger: Arc<Vec<ItemRef>>,
}

/// What the supervisor learns when a node task finishes. Outputs are already
/// in the store by then; only status flows back.
pub(crate) struct NodeRunOutcome {
    pub(crate) node_id: String,
    pub(crate) attempts: u32,
    /// Error absorbed by continue-on-fail; the node still counts as Success.
    pub(crate) recorded_error: Option<String>,
    pub(crate) result: Result<(), NodeError>,
}

impl NodeRunner {
    pub(crate) async fn run(self, spec: NodeSpec, node: Box<dyn Node>) -> NodeRunOutcome {
        let inputs = self.assemble_inputs(&spec);

        self.bus.emit(ExecutionEvent::NodeStarted {
            execution_id: self.execution_id,
            node_id: spec.id.clone(),
            node_type: spec.node_type.clone(),
            timestamp: Utc::now(),
        });
        let started = Instant::now();

        let mut attempts: u32 = 0;
        let result = match self.resolve_credentials(&spec).await {
            // Credential failures are never retried; the recorded state
            // reads as having spent its retries at once.
            Err(e) => {
                attempts = spec.max_retries;
                Err(e)
            }
            Ok(credentials) => loop {
                attempts += 1;
                let ctx = NodeContext {
                    node_id: spec.id.clone(),
                    inputs: inputs.clone(),
                    parameters: spec.parameters.clone(),
                    credentials: credentials.clone(),
                    events: self.bus.create_emitter(self.execution_id, spec.id.clone()),
                    cancellation: self.cancellation.child_token(),
                };

                match self.attempt(&spec, node.as_ref(), ctx).await {
                    Ok(output) => break Ok(output),
                    Err(e)
                        if e.is_retryable()
                            && attempts <= spec.max_retries
                            && !self.cancellation.is_cancelled() =>
                    {
                        let delay = backoff_delay(
                            spec.retry_delay(),
                            self.settings.backoff_factor,
                            self.settings.max_retry_delay(),
                            attempts - 1,
                        );
                        tracing::warn!(
                            node = %spec.id,
                            error = %e,
                            attempt = attempts,
                            delay_ms = delay.as_millis() as u64,
                            "node attempt failed, retrying"
                        );
                        self.bus.emit(ExecutionEvent::NodeRetrying {
                            execution_id: self.execution_id,
                            node_id: spec.id.clone(),
                            attempt: attempts,
                            delay_ms: delay.as_millis() as u64,
                            error: e.to_string(),
                            timestamp: Utc::now(),
                        });
                        tokio::select! {
                            _ = sleep(delay) => {}
                            _ = self.cancellation.cancelled() => break Err(NodeError::Cancelled),
                        }
                    }
                    Err(e) => break Err(e),
                }
            },
        };

        self.finalize(&spec, node.as_ref(), result, attempts, started)
    }

    /// One invocation of `Node::execute`, bounded by the node's timeout and
    /// the remaining execution-wide budget, racing cancellation.
    ///
    /// Expiry of the node's own timeout is a retryable node error; expiry of
    /// the execution budget is reported as cancellation, because the
    /// supervisor is about to time the whole run out.
    async fn attempt(
        &self,
        spec: &NodeSpec,
        node: &dyn Node,
        ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let limit = self.attempt_limit(spec);
        let run = async {
            match limit {
                Some(AttemptLimit::Node(limit)) => match timeout(limit, node.execute(ctx)).await {
                    Ok(res) => res,
                    Err(_) => Err(NodeError::Timeout {
                        limit_ms: limit.as_millis() as u64,
                    }),
                },
                Some(AttemptLimit::Budget(limit)) => match timeout(limit, node.execute(ctx)).await
                {
                    Ok(res) => res,
                    Err(_) => Err(NodeError::Cancelled),
                },
                None => node.execute(ctx).await,
            }
        };

        tokio::select! {
            res = run => res,
            _ = self.cancellation.cancelled() => Err(NodeError::Cancelled),
        }
    }

    fn finalize(
        &self,
        spec: &NodeSpec,
        node: &dyn Node,
        result: Result<NodeOutput, NodeError>,
        attempts: u32,
        started: Instant,
    ) -> NodeRunOutcome {
        let node_id = spec.id.clone();
        match result {
            Ok(output) => match self.write_outputs(spec, node, output) {
                Ok(()) => {
                    self.emit_finished(&node_id, attempts, started);
                    NodeRunOutcome {
                        node_id,
                        attempts,
                        recorded_error: None,
                        result: Ok(()),
                    }
                }
                Err(e) => {
                    // A duplicate slot write is an engine defect, not a node fault.
                    tracing::error!(node = %node_id, error = %e, "output write rejected");
                    NodeRunOutcome {
                        node_id,
                        attempts,
                        recorded_error: None,
                        result: Err(NodeError::Failed(e.to_string())),
                    }
                }
            },
            Err(NodeError::Cancelled) => NodeRunOutcome {
                node_id,
                attempts,
                recorded_error: None,
                result: Err(NodeError::Cancelled),
            },
            Err(e) if spec.continue_on_fail => {
                // Absorb the failure: downstream nodes receive the error as
                // data and can branch on it.
                let item = Item::new()
                    .with_field("error", e.to_string())
                    .with_field("node", node_id.clone());
                if let Err(write_err) = self.write_error_output(spec, node, item) {
                    tracing::error!(node = %node_id, error = %write_err, "output write rejected");
                    return NodeRunOutcome {
                        node_id,
                        attempts,
                        recorded_error: None,
                        result: Err(NodeError::Failed(write_err.to_string())),
                    };
                }
                self.emit_finished(&node_id, attempts, started);
                NodeRunOutcome {
                    node_id,
                    attempts,
                    recorded_error: Some(e.to_string()),
                    result: Ok(()),
                }
            }
            Err(e) => {
                self.bus.emit(ExecutionEvent::NodeFailed {
                    execution_id: self.execution_id,
                    node_id: node_id.clone(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                NodeRunOutcome {
                    node_id,
                    attempts,
                    recorded_error: None,
                    result: Err(e),
                }
            }
        }
    }

    /// Merge items from every incoming connection into the node's input
    /// ports, in connection-declaration order. Skipped upstream ports
    /// contribute nothing. Root nodes receive the trigger payload on "main".
    fn assemble_inputs(&self, spec: &NodeSpec) -> HashMap<PortName, Vec<ItemRef>> {
        let mut inputs: HashMap<PortName, Vec<ItemRef>> = HashMap::new();
        let incoming = self.graph.incoming(&spec.id);
        if incoming.is_empty() {
            inputs.insert(MAIN_PORT.to_string(), self.trigger.as_ref().clone());
            return inputs;
        }

        for conn in incoming {
            match self.store.get(&conn.source_node, &conn.source_port) {
                Some(PortState::Produced(items)) => inputs
                    .entry(conn.target_port.clone())
                    .or_default()
                    .extend(items.iter().cloned()),
                Some(PortState::Skipped) => {}
                // The supervisor only dispatches fully resolved nodes.
                None => debug_assert!(false, "node dispatched with unresolved input"),
            }
        }
        inputs
    }

    async fn resolve_credentials(&self, spec: &NodeSpec) -> Result<Option<Credentials>, NodeError> {
        match &spec.credential {
            Some(reference) => Ok(Some(self.credentials.resolve(reference).await?)),
            None => Ok(None),
        }
    }

    /// Deadline for one attempt: min(node timeout override, remaining
    /// execution budget), tagged with which bound is the tighter one.
    fn attempt_limit(&self, spec: &NodeSpec) -> Option<AttemptLimit> {
        let remaining = self
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));
        match (spec.timeout(), remaining) {
            (Some(node_limit), Some(budget)) if node_limit <= budget => {
                Some(AttemptLimit::Node(node_limit))
            }
            (Some(_), Some(budget)) => Some(AttemptLimit::Budget(budget)),
            (Some(node_limit), None) => Some(AttemptLimit::Node(node_limit)),
            (None, Some(budget)) => Some(AttemptLimit::Budget(budget)),
            (None, None) => None,
        }
    }

    /// Write every declared port: produced ports go to the store, untouched
    /// declared ports are marked skipped so downstream readiness resolves.
    /// Ports emitted beyond the declared set still flow downstream.
    fn write_outputs(
        &self,
        spec: &NodeSpec,
        node: &dyn Node,
        mut output: NodeOutput,
    ) -> Result<(), StoreError> {
        for port in node.output_ports() {
            match output.ports.remove(&port) {
                Some(items) => self.store.put(&spec.id, &port, share_items(items))?,
                None => self.store.mark_skipped(&spec.id, &port)?,
            }
        }
        for (port, items) in output.ports {
            self.store.put(&spec.id, &port, share_items(items))?;
        }
        Ok(())
    }

    fn write_error_output(
        &self,
        spec: &NodeSpec,
        node: &dyn Node,
        item: Item,
    ) -> Result<(), StoreError> {
        self.store
            .put(&spec.id, MAIN_PORT, share_items(vec![item]))?;
        for port in node.output_ports() {
            if port != MAIN_PORT {
                self.store.mark_skipped(&spec.id, &port)?;
            }
        }
        Ok(())
    }

    fn emit_finished(&self, node_id: &str, attempts: u32, started: Instant) {
        self.bus.emit(ExecutionEvent::NodeFinished {
            execution_id: self.execution_id,
            node_id: node_id.to_string(),
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
    }
}

enum AttemptLimit {
    /// The node's own timeout override is the tighter bound.
    Node(Duration),
    /// The execution-wide budget is the tighter bound.
    Budget(Duration),
}

/// `retry_delay * backoff_factor^exponent`, capped.
fn backoff_delay(base: Duration, factor: f64, cap: Duration, exponent: u32) -> Duration {
    let scaled = base.as_millis() as f64 * factor.powi(exponent as i32);
    let capped = scaled.min(cap.as_millis() as f64);
    Duration::from_millis(capped as u64)
}
