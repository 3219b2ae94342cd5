//! Workflow execution runtime
//!
//! This crate provides the engine that drives a workflow graph to completion:
//! the validated execution graph, the data flow store carrying items between
//! nodes, the per-node task runner (timeouts, retries, continue-on-fail), the
//! orchestrator supervising one in-flight execution, and the `Engine` facade
//! for starting, cancelling, and observing executions.

mod engine;
mod graph;
mod orchestrator;
mod registry;
mod runner;
mod store;

pub use engine::{Engine, EngineConfig, ExecutionHandle};
pub use graph::ExecutionGraph;
pub use registry::{NodeFactory, NodeRegistry, NodeTypeInfo};
pub use store::{DataFlowStore, PortState};
