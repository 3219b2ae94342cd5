// crates/loomruntime/tests/engine_test.rs

use async_trait::async_trait;
use loomcore::{
    Credentials, EngineError, ExecutionEvent, ExecutionMode, ExecutionStatus, Item, MemorySink,
    Node, NodeContext, NodeError, NodeOutput, NodeRunStatus, NodeSpec, PortName, RegistryError,
    StaticCredentials, WorkflowDefinition,
};
use loomruntime::{Engine, NodeFactory, NodeRegistry};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};

// ---- test doubles --------------------------------------------------------

/// Emits the items given in the "items" parameter (or one empty item).
struct EmitNode;

#[async_trait]
impl Node for EmitNode {
    fn node_type(&self) -> &str {
        "test.emit"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let raw = ctx.parameter_or("items", json!([{}]));
        let items = raw
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(Item::from_json)
            .collect();
        Ok(NodeOutput::items(items))
    }
}

/// Passes every input item through unchanged.
struct PassNode;

#[async_trait]
impl Node for PassNode {
    fn node_type(&self) -> &str {
        "test.pass"
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

/// Sleeps for the "ms" parameter, then emits a single item.
struct SleepNode;

#[async_trait]
impl Node for SleepNode {
    fn node_type(&self) -> &str {
        "test.sleep"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let ms = ctx.parameter_or("ms", json!(0)).as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(NodeOutput::single(Item::new().with_field("slept_ms", ms)))
    }
}

/// Fails with a retryable error for the first `failures` invocations, then
/// succeeds. Records the instant of every invocation.
struct FlakyNode {
    calls: Arc<Mutex<Vec<Instant>>>,
    failures: u32,
}

#[async_trait]
impl Node for FlakyNode {
    fn node_type(&self) -> &str {
        "test.flaky"
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let call_count = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Instant::now());
            calls.len() as u32
        };
        if call_count <= self.failures {
            return Err(NodeError::Network("connection reset".to_string()));
        }
        Ok(NodeOutput::single(
            Item::new().with_field("attempt", call_count),
        ))
    }
}

/// Counts how many instances are inside `execute` at once.
struct GateNode {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl Node for GateNode {
    fn node_type(&self) -> &str {
        "test.gate"
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let inside = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(inside, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(NodeOutput::single(Item::new()))
    }
}

/// Declares "left" and "right" but only ever emits on "left".
struct LeftOnlyNode;

#[async_trait]
impl Node for LeftOnlyNode {
    fn node_type(&self) -> &str {
        "test.left_only"
    }

    fn output_ports(&self) -> Vec<PortName> {
        vec!["left".to_string(), "right".to_string()]
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::empty()
            .with_port("left", vec![Item::new().with_field("side", "left")]))
    }
}

/// Captures every input item for later assertions, passing them through.
struct CaptureNode {
    seen: Arc<Mutex<Vec<Item>>>,
}

#[async_trait]
impl Node for CaptureNode {
    fn node_type(&self) -> &str {
        "test.capture"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let items: Vec<Item> = ctx
            .all_items()
            .iter()
            .map(|item| item.as_ref().clone())
            .collect();
        self.seen.lock().unwrap().extend(items.clone());
        Ok(NodeOutput::items(items))
    }
}

/// Emits the resolved credential's "token" value as an item.
struct CredEchoNode;

#[async_trait]
impl Node for CredEchoNode {
    fn node_type(&self) -> &str {
        "test.cred_echo"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let token = ctx
            .credentials
            .as_ref()
            .and_then(|c| c.get("token"))
            .cloned()
            .ok_or_else(|| NodeError::Credential("no token resolved".to_string()))?;
        Ok(NodeOutput::single(Item::new().with_field("token", token)))
    }
}

struct DoubleFactory {
    node_type: &'static str,
    make: Box<dyn Fn() -> Box<dyn Node> + Send + Sync>,
}

impl NodeFactory for DoubleFactory {
    fn create(
        &self,
        _parameters: &HashMap<String, serde_json::Value>,
    ) -> Result<Box<dyn Node>, NodeError> {
        Ok((self.make)())
    }

    fn node_type(&self) -> &str {
        self.node_type
    }
}

fn register(
    registry: &mut NodeRegistry,
    node_type: &'static str,
    make: impl Fn() -> Box<dyn Node> + Send + Sync + 'static,
) {
    registry.register(Arc::new(DoubleFactory {
        node_type,
        make: Box::new(make),
    }));
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_test_writer()
        .try_init();
}

fn base_registry() -> NodeRegistry {
    init_tracing();
    let mut registry = NodeRegistry::new();
    register(&mut registry, "test.emit", || Box::new(EmitNode));
    register(&mut registry, "test.pass", || Box::new(PassNode));
    register(&mut registry, "test.sleep", || Box::new(SleepNode));
    register(&mut registry, "test.left_only", || Box::new(LeftOnlyNode));
    registry
}

fn capture(registry: &mut NodeRegistry) -> Arc<Mutex<Vec<Item>>> {
    let seen: Arc<Mutex<Vec<Item>>> = Arc::default();
    let captured = Arc::clone(&seen);
    register(registry, "test.capture", move || {
        Box::new(CaptureNode {
            seen: Arc::clone(&captured),
        })
    });
    seen
}

fn gate(registry: &mut NodeRegistry) -> Arc<AtomicUsize> {
    let current: Arc<AtomicUsize> = Arc::default();
    let peak: Arc<AtomicUsize> = Arc::default();
    let observed = Arc::clone(&peak);
    register(registry, "test.gate", move || {
        Box::new(GateNode {
            current: Arc::clone(&current),
            peak: Arc::clone(&observed),
        })
    });
    peak
}

fn flaky(registry: &mut NodeRegistry, failures: u32) -> Arc<Mutex<Vec<Instant>>> {
    let calls: Arc<Mutex<Vec<Instant>>> = Arc::default();
    let recorded = Arc::clone(&calls);
    register(registry, "test.flaky", move || {
        Box::new(FlakyNode {
            calls: Arc::clone(&recorded),
            failures,
        })
    });
    calls
}

// ---- tests ---------------------------------------------------------------

#[tokio::test]
async fn linear_chain_runs_to_success() {
    let mut registry = base_registry();
    let seen = capture(&mut registry);
    let sink = Arc::new(MemorySink::new());
    let engine = Engine::new(Arc::new(registry)).with_sink(sink.clone());

    let mut def = WorkflowDefinition::new("linear");
    def.add_node(NodeSpec::new("source", "test.emit").with_parameter("items", json!([{"x": 1}])));
    def.add_node(NodeSpec::new("relay", "test.pass"));
    def.add_node(NodeSpec::new("capture", "test.capture"));
    def.connect("source", "main", "relay", "main");
    def.connect("relay", "main", "capture", "main");

    let handle = engine
        .start_execution(def, Vec::new(), ExecutionMode::Manual)
        .unwrap();
    let execution_id = handle.execution_id;
    let execution = handle.wait().await;

    assert_eq!(execution.status, ExecutionStatus::Success);
    assert!(execution.error_node.is_none());

    let items = seen.lock().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get("x"), Some(&json!(1)));

    // Every node reached exactly one terminal status.
    for (_, state) in sink.node_states(execution_id) {
        assert_eq!(state.status, NodeRunStatus::Success);
    }
}

#[tokio::test]
async fn consumer_never_starts_before_producer_finishes() {
    let registry = base_registry();
    let sink = Arc::new(MemorySink::new());
    let engine = Engine::new(Arc::new(registry)).with_sink(sink.clone());

    let mut def = WorkflowDefinition::new("ordered");
    def.add_node(NodeSpec::new("producer", "test.sleep").with_parameter("ms", json!(20)));
    def.add_node(NodeSpec::new("consumer", "test.pass"));
    // An unrelated branch may interleave arbitrarily.
    def.add_node(NodeSpec::new("bystander", "test.sleep").with_parameter("ms", json!(5)));
    def.connect("producer", "main", "consumer", "main");

    let handle = engine
        .start_execution(def, Vec::new(), ExecutionMode::Manual)
        .unwrap();
    let execution_id = handle.execution_id;
    assert_eq!(handle.wait().await.status, ExecutionStatus::Success);

    let producer = sink.latest_node(execution_id, "producer").unwrap();
    let consumer = sink.latest_node(execution_id, "consumer").unwrap();
    assert!(consumer.started_at.unwrap() >= producer.finished_at.unwrap());
}

#[tokio::test(start_paused = true)]
async fn dispatch_respects_the_parallelism_bound() {
    let mut registry = base_registry();
    let peak = gate(&mut registry);
    let engine = Engine::new(Arc::new(registry));

    // Six independent roots, but never more than two workers at once.
    let mut def = WorkflowDefinition::new("bounded");
    def.settings.max_parallel_nodes = 2;
    for n in 0..6 {
        def.add_node(NodeSpec::new(format!("gate-{n}"), "test.gate"));
    }

    let handle = engine
        .start_execution(def, Vec::new(), ExecutionMode::Manual)
        .unwrap();
    assert_eq!(handle.wait().await.status, ExecutionStatus::Success);

    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn retry_policy_runs_three_attempts_with_backoff() {
    let mut registry = base_registry();
    let calls = flaky(&mut registry, u32::MAX);
    let sink = Arc::new(MemorySink::new());
    let engine = Engine::new(Arc::new(registry)).with_sink(sink.clone());

    let mut def = WorkflowDefinition::new("retries");
    def.add_node(NodeSpec::new("flaky", "test.flaky").with_retries(2, 100));

    let handle = engine
        .start_execution(def, Vec::new(), ExecutionMode::Manual)
        .unwrap();
    let execution = handle.wait().await;

    assert_eq!(execution.status, ExecutionStatus::Error);
    assert_eq!(execution.error_node.as_deref(), Some("flaky"));

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 3, "1 initial attempt + 2 retries");
    assert!(calls[1] - calls[0] >= Duration::from_millis(100));
    assert!(calls[2] - calls[1] >= Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn flaky_node_eventually_succeeds() {
    let mut registry = base_registry();
    let calls = flaky(&mut registry, 2);
    let sink = Arc::new(MemorySink::new());
    let engine = Engine::new(Arc::new(registry)).with_sink(sink.clone());

    let mut def = WorkflowDefinition::new("recovery");
    def.add_node(NodeSpec::new("flaky", "test.flaky").with_retries(3, 50));

    let handle = engine
        .start_execution(def, Vec::new(), ExecutionMode::Manual)
        .unwrap();
    let execution_id = handle.execution_id;
    assert_eq!(handle.wait().await.status, ExecutionStatus::Success);

    assert_eq!(calls.lock().unwrap().len(), 3);
    let state = sink.latest_node(execution_id, "flaky").unwrap();
    assert_eq!(state.status, NodeRunStatus::Success);
    assert_eq!(state.attempt, 3);
}

#[tokio::test]
async fn continue_on_fail_feeds_the_error_downstream() {
    let mut registry = base_registry();
    flaky(&mut registry, u32::MAX);
    let seen = capture(&mut registry);
    let sink = Arc::new(MemorySink::new());
    let engine = Engine::new(Arc::new(registry)).with_sink(sink.clone());

    let mut def = WorkflowDefinition::new("absorbed");
    def.add_node(NodeSpec::new("flaky", "test.flaky").continue_on_fail());
    def.add_node(NodeSpec::new("capture", "test.capture"));
    def.connect("flaky", "main", "capture", "main");

    let handle = engine
        .start_execution(def, Vec::new(), ExecutionMode::Manual)
        .unwrap();
    let execution_id = handle.execution_id;
    let execution = handle.wait().await;

    assert_eq!(execution.status, ExecutionStatus::Success);

    let state = sink.latest_node(execution_id, "flaky").unwrap();
    assert_eq!(state.status, NodeRunStatus::Success);
    assert!(state.error.is_some(), "absorbed error is still recorded");

    let items = seen.lock().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get("node"), Some(&json!("flaky")));
    assert!(items[0].get("error").is_some());
}

#[tokio::test(start_paused = true)]
async fn first_failure_aborts_and_cancels_siblings() {
    let mut registry = base_registry();
    flaky(&mut registry, u32::MAX);
    let sink = Arc::new(MemorySink::new());
    let engine = Engine::new(Arc::new(registry)).with_sink(sink.clone());

    let mut def = WorkflowDefinition::new("abort");
    def.add_node(NodeSpec::new("boom", "test.flaky"));
    def.add_node(NodeSpec::new("slow", "test.sleep").with_parameter("ms", json!(60_000)));
    def.add_node(NodeSpec::new("after_slow", "test.pass"));
    def.connect("slow", "main", "after_slow", "main");

    let started = Instant::now();
    let handle = engine
        .start_execution(def, Vec::new(), ExecutionMode::Manual)
        .unwrap();
    let execution_id = handle.execution_id;
    let execution = handle.wait().await;

    assert_eq!(execution.status, ExecutionStatus::Error);
    assert_eq!(execution.error_node.as_deref(), Some("boom"));
    // The sibling observed cancellation instead of sleeping out its minute.
    assert!(started.elapsed() < Duration::from_secs(30));

    let slow = sink.latest_node(execution_id, "slow").unwrap();
    assert_eq!(slow.status, NodeRunStatus::Error);
    let after = sink.latest_node(execution_id, "after_slow").unwrap();
    assert_eq!(after.status, NodeRunStatus::Skipped);
}

#[tokio::test(start_paused = true)]
async fn execution_timeout_stops_the_run() {
    let mut registry = base_registry();
    let seen = capture(&mut registry);
    let sink = Arc::new(MemorySink::new());
    let engine = Engine::new(Arc::new(registry)).with_sink(sink.clone());

    let mut def = WorkflowDefinition::new("budget");
    def.settings.max_execution_time_ms = Some(500);
    def.add_node(NodeSpec::new("slow", "test.sleep").with_parameter("ms", json!(2000)));
    def.add_node(NodeSpec::new("capture", "test.capture"));
    def.connect("slow", "main", "capture", "main");

    let handle = engine
        .start_execution(def, Vec::new(), ExecutionMode::Manual)
        .unwrap();
    let execution_id = handle.execution_id;
    let execution = handle.wait().await;

    assert_eq!(execution.status, ExecutionStatus::Timeout);
    // Nothing after the slow node ever started.
    assert!(seen.lock().unwrap().is_empty());
    let capture_state = sink.latest_node(execution_id, "capture").unwrap();
    assert!(capture_state.started_at.is_none());
}

#[tokio::test(start_paused = true)]
async fn node_timeout_is_retryable() {
    let registry = base_registry();
    let sink = Arc::new(MemorySink::new());
    let engine = Engine::new(Arc::new(registry)).with_sink(sink.clone());

    let mut def = WorkflowDefinition::new("node-timeout");
    def.add_node(
        NodeSpec::new("slow", "test.sleep")
            .with_parameter("ms", json!(500))
            .with_timeout(50)
            .with_retries(1, 100),
    );

    let handle = engine
        .start_execution(def, Vec::new(), ExecutionMode::Manual)
        .unwrap();
    let execution_id = handle.execution_id;
    let execution = handle.wait().await;

    assert_eq!(execution.status, ExecutionStatus::Error);
    assert!(execution
        .error_message
        .as_deref()
        .unwrap()
        .contains("timed out"));

    let state = sink.latest_node(execution_id, "slow").unwrap();
    assert_eq!(state.attempt, 2, "one retry after the first timeout");
}

#[tokio::test(start_paused = true)]
async fn cancellation_preserves_completed_outputs() {
    let registry = base_registry();
    let sink = Arc::new(MemorySink::new());
    let engine = Engine::new(Arc::new(registry)).with_sink(sink.clone());

    let mut def = WorkflowDefinition::new("cancel");
    def.add_node(NodeSpec::new("quick", "test.emit"));
    def.add_node(NodeSpec::new("slow", "test.sleep").with_parameter("ms", json!(60_000)));
    def.connect("quick", "main", "slow", "main");

    let handle = engine
        .start_execution(def, Vec::new(), ExecutionMode::Manual)
        .unwrap();
    let execution_id = handle.execution_id;

    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.cancel(execution_id).unwrap();
    let execution = handle.wait().await;

    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert!(execution.error_node.is_none());

    let quick = sink.latest_node(execution_id, "quick").unwrap();
    assert_eq!(quick.status, NodeRunStatus::Success);
    let slow = sink.latest_node(execution_id, "slow").unwrap();
    assert_eq!(slow.status, NodeRunStatus::Error);
}

#[tokio::test]
async fn partial_skip_runs_with_resolved_inputs() {
    let mut registry = base_registry();
    let seen = capture(&mut registry);
    let sink = Arc::new(MemorySink::new());
    let engine = Engine::new(Arc::new(registry)).with_sink(sink.clone());

    // branch emits only "left"; merge sees one produced and one skipped
    // input and runs with what resolved. The chain hanging off "right" is
    // skipped all the way down.
    let mut def = WorkflowDefinition::new("skips");
    def.add_node(NodeSpec::new("branch", "test.left_only"));
    def.add_node(NodeSpec::new("merge", "test.pass"));
    def.add_node(NodeSpec::new("right_child", "test.pass"));
    def.add_node(NodeSpec::new("right_grandchild", "test.pass"));
    def.add_node(NodeSpec::new("capture_sink", "test.capture"));
    def.connect("branch", "left", "merge", "main");
    def.connect("branch", "right", "merge", "main");
    def.connect("branch", "right", "right_child", "main");
    def.connect("right_child", "main", "right_grandchild", "main");
    def.connect("right_grandchild", "main", "capture_sink", "main");

    let handle = engine
        .start_execution(def, Vec::new(), ExecutionMode::Manual)
        .unwrap();
    let execution_id = handle.execution_id;
    let execution = handle.wait().await;

    assert_eq!(execution.status, ExecutionStatus::Success);

    let states = sink.node_states(execution_id);
    assert_eq!(states["branch"].status, NodeRunStatus::Success);
    assert_eq!(states["merge"].status, NodeRunStatus::Success);
    assert_eq!(states["right_child"].status, NodeRunStatus::Skipped);
    assert_eq!(states["right_grandchild"].status, NodeRunStatus::Skipped);
    assert_eq!(states["capture_sink"].status, NodeRunStatus::Skipped);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unresolved_port_is_reported_as_deadlock() {
    let registry = base_registry();
    let engine = Engine::new(Arc::new(registry));

    // "other" is a port the pass node never declares or emits; the consumer
    // can never become ready. Validation cannot see this, the supervising
    // loop must.
    let mut def = WorkflowDefinition::new("stuck");
    def.add_node(NodeSpec::new("a", "test.pass"));
    def.add_node(NodeSpec::new("b", "test.pass"));
    def.connect("a", "other", "b", "main");

    let handle = engine
        .start_execution(def, Vec::new(), ExecutionMode::Manual)
        .unwrap();
    let execution = handle.wait().await;

    assert_eq!(execution.status, ExecutionStatus::Error);
    assert!(execution.error_node.is_none());
    assert!(execution
        .error_message
        .as_deref()
        .unwrap()
        .contains("not complete"));
}

#[tokio::test]
async fn unknown_node_type_is_rejected_before_start() {
    let registry = base_registry();
    let engine = Engine::new(Arc::new(registry));

    let mut def = WorkflowDefinition::new("unknown");
    def.add_node(NodeSpec::new("mystery", "test.unregistered"));

    match engine.start_execution(def, Vec::new(), ExecutionMode::Manual) {
        Err(EngineError::Registry(RegistryError::UnknownNodeType(t))) => {
            assert_eq!(t, "test.unregistered");
        }
        other => panic!("expected UnknownNodeType, got {:?}", other.err()),
    }
}

#[tokio::test]
async fn trigger_payload_reaches_root_nodes() {
    let mut registry = base_registry();
    let seen = capture(&mut registry);
    let engine = Engine::new(Arc::new(registry));

    let mut def = WorkflowDefinition::new("trigger");
    def.add_node(NodeSpec::new("root", "test.pass"));
    def.add_node(NodeSpec::new("capture", "test.capture"));
    def.connect("root", "main", "capture", "main");

    let trigger = vec![Item::from_json(json!({"payload": "hello"}))];
    let handle = engine
        .start_execution(def, trigger, ExecutionMode::Webhook)
        .unwrap();
    assert_eq!(handle.wait().await.status, ExecutionStatus::Success);

    let items = seen.lock().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get("payload"), Some(&json!("hello")));
}

#[tokio::test]
async fn credentials_are_resolved_for_nodes_that_reference_them() {
    let mut registry = base_registry();
    register(&mut registry, "test.cred_echo", || Box::new(CredEchoNode));
    let seen = capture(&mut registry);
    let provider = StaticCredentials::new().with(
        "api",
        Credentials::new().with_value("token", "s3cr3t"),
    );
    let engine = Engine::new(Arc::new(registry)).with_credentials(Arc::new(provider));

    let mut def = WorkflowDefinition::new("creds");
    def.add_node(NodeSpec::new("call", "test.cred_echo").with_credential("api"));
    def.add_node(NodeSpec::new("capture", "test.capture"));
    def.connect("call", "main", "capture", "main");

    let handle = engine
        .start_execution(def, Vec::new(), ExecutionMode::Manual)
        .unwrap();
    assert_eq!(handle.wait().await.status, ExecutionStatus::Success);

    let items = seen.lock().unwrap();
    assert_eq!(items[0].get("token"), Some(&json!("s3cr3t")));
}

#[tokio::test]
async fn credential_failure_is_not_retried() {
    let mut registry = base_registry();
    register(&mut registry, "test.cred_echo", || Box::new(CredEchoNode));
    let sink = Arc::new(MemorySink::new());
    let engine = Engine::new(Arc::new(registry)).with_sink(sink.clone());

    let mut def = WorkflowDefinition::new("bad-creds");
    def.add_node(
        NodeSpec::new("call", "test.cred_echo")
            .with_credential("missing")
            .with_retries(5, 10),
    );

    let handle = engine
        .start_execution(def, Vec::new(), ExecutionMode::Manual)
        .unwrap();
    let execution_id = handle.execution_id;
    let execution = handle.wait().await;

    assert_eq!(execution.status, ExecutionStatus::Error);
    let state = sink.latest_node(execution_id, "call").unwrap();
    assert_eq!(state.status, NodeRunStatus::Error);
    // The node body never ran; the retry budget is spent in one step.
    assert_eq!(state.attempt, 5);
    assert!(state.error.as_deref().unwrap().contains("credential"));
}

#[tokio::test]
async fn status_queries_work_during_and_after_the_run() {
    let registry = base_registry();
    let engine = Engine::new(Arc::new(registry));

    let mut def = WorkflowDefinition::new("status");
    def.add_node(NodeSpec::new("only", "test.emit"));

    let handle = engine
        .start_execution(def, Vec::new(), ExecutionMode::Test)
        .unwrap();
    let execution_id = handle.execution_id;
    assert!(engine.get_status(execution_id).is_some());

    handle.wait().await;
    let status = engine.get_status(execution_id).unwrap();
    assert_eq!(status.status, ExecutionStatus::Success);
    assert!(status.finished_at.is_some());

    assert!(matches!(
        engine.cancel(uuid::Uuid::new_v4()),
        Err(EngineError::ExecutionNotFound(_))
    ));
}

#[tokio::test]
async fn events_are_published_over_the_bus() {
    let registry = base_registry();
    let engine = Engine::new(Arc::new(registry));
    let mut events = engine.subscribe_events();

    let mut def = WorkflowDefinition::new("events");
    def.add_node(NodeSpec::new("only", "test.emit"));

    let handle = engine
        .start_execution(def, Vec::new(), ExecutionMode::Manual)
        .unwrap();
    handle.wait().await;

    let mut saw_node_started = false;
    let mut saw_finished = false;
    while let Ok(event) = events.try_recv() {
        match event {
            ExecutionEvent::NodeStarted { node_id, .. } => {
                assert_eq!(node_id, "only");
                saw_node_started = true;
            }
            ExecutionEvent::ExecutionFinished { status, .. } => {
                assert_eq!(status, ExecutionStatus::Success);
                saw_finished = true;
            }
            _ => {}
        }
    }
    assert!(saw_node_started);
    assert!(saw_finished);
}
