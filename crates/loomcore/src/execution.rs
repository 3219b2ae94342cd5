use crate::workflow::{NodeId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Status of an execution as a whole.
///
/// `Waiting → Running → {Success, Error, Cancelled, Timeout}`; terminal states
/// are never left again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Waiting,
    Running,
    Success,
    Error,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success
                | ExecutionStatus::Error
                | ExecutionStatus::Cancelled
                | ExecutionStatus::Timeout
        )
    }
}

/// How the execution was triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Manual,
    Webhook,
    Schedule,
    Retry,
    Test,
}

/// One workflow run, owned by the orchestrator for its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub status: ExecutionStatus,
    pub mode: ExecutionMode,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_node: Option<NodeId>,
    pub error_message: Option<String>,
}

impl Execution {
    pub fn new(workflow_id: WorkflowId, mode: ExecutionMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            status: ExecutionStatus::Waiting,
            mode,
            started_at: None,
            finished_at: None,
            error_node: None,
            error_message: None,
        }
    }

    /// First node dispatched; the run is now live.
    pub fn start(&mut self) {
        if self.status == ExecutionStatus::Waiting {
            self.status = ExecutionStatus::Running;
            self.started_at = Some(Utc::now());
        }
    }

    pub fn complete(&mut self) {
        self.finish(ExecutionStatus::Success);
    }

    pub fn fail(&mut self, node_id: impl Into<NodeId>, message: impl Into<String>) {
        if !self.status.is_terminal() {
            self.error_node = Some(node_id.into());
            self.error_message = Some(message.into());
        }
        self.finish(ExecutionStatus::Error);
    }

    /// Engine-internal fault (deadlock); no single node is to blame.
    pub fn fail_structural(&mut self, message: impl Into<String>) {
        if !self.status.is_terminal() {
            self.error_message = Some(message.into());
        }
        self.finish(ExecutionStatus::Error);
    }

    pub fn cancel(&mut self) {
        self.finish(ExecutionStatus::Cancelled);
    }

    pub fn timeout(&mut self) {
        self.finish(ExecutionStatus::Timeout);
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    fn finish(&mut self, status: ExecutionStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}

/// Status of a single node within one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunStatus {
    Pending,
    Ready,
    Running,
    Success,
    Error,
    Skipped,
}

impl NodeRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeRunStatus::Success | NodeRunStatus::Error | NodeRunStatus::Skipped
        )
    }
}

/// Run state of one node instance: created `Pending` at execution start,
/// reaches exactly one terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRunState {
    pub node_id: NodeId,
    pub status: NodeRunStatus,
    pub attempt: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl NodeRunState {
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeRunStatus::Pending,
            attempt: 0,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_ready(&mut self) {
        if self.status == NodeRunStatus::Pending {
            self.status = NodeRunStatus::Ready;
        }
    }

    pub fn mark_running(&mut self) {
        debug_assert!(!self.status.is_terminal());
        self.status = NodeRunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn succeed(&mut self, attempts: u32, recorded_error: Option<String>) {
        self.attempt = attempts;
        self.error = recorded_error;
        self.finish(NodeRunStatus::Success);
    }

    pub fn fail(&mut self, attempts: u32, error: impl Into<String>) {
        self.attempt = attempts;
        self.error = Some(error.into());
        self.finish(NodeRunStatus::Error);
    }

    pub fn skip(&mut self) {
        self.finish(NodeRunStatus::Skipped);
    }

    fn finish(&mut self, status: NodeRunStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}
