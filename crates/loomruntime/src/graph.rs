use loomcore::{ConnectionSpec, GraphError, NodeId, NodeSpec, WorkflowDefinition};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, VecDeque};

/// Immutable adjacency view of one workflow, built once per execution.
///
/// Construction validates the structural invariants (known node references,
/// no self-loops, acyclicity); after `build` returns, the graph never changes,
/// so it is shared freely across worker tasks without locking.
pub struct ExecutionGraph {
    nodes: HashMap<NodeId, NodeSpec>,
    incoming: HashMap<NodeId, Vec<ConnectionSpec>>,
    outgoing: HashMap<NodeId, Vec<ConnectionSpec>>,
    roots: Vec<NodeId>,
    order: Vec<NodeId>,
}

impl ExecutionGraph {
    /// Validate a workflow definition and build the adjacency structure.
    pub fn build(def: &WorkflowDefinition) -> Result<Self, GraphError> {
        if def.nodes.is_empty() {
            return Err(GraphError::EmptyWorkflow);
        }

        let mut nodes = HashMap::new();
        for spec in &def.nodes {
            if nodes.insert(spec.id.clone(), spec.clone()).is_some() {
                return Err(GraphError::DuplicateNode(spec.id.clone()));
            }
        }

        let mut incoming: HashMap<NodeId, Vec<ConnectionSpec>> = HashMap::new();
        let mut outgoing: HashMap<NodeId, Vec<ConnectionSpec>> = HashMap::new();

        let mut graph: DiGraph<NodeId, ()> = DiGraph::new();
        let mut index_of: HashMap<NodeId, NodeIndex> = HashMap::new();
        for spec in &def.nodes {
            let idx = graph.add_node(spec.id.clone());
            index_of.insert(spec.id.clone(), idx);
        }

        // Connection declaration order is preserved in the adjacency lists;
        // input merging depends on it.
        for conn in &def.connections {
            let source = index_of
                .get(&conn.source_node)
                .ok_or_else(|| GraphError::UnknownNode(conn.source_node.clone()))?;
            let target = index_of
                .get(&conn.target_node)
                .ok_or_else(|| GraphError::UnknownNode(conn.target_node.clone()))?;
            if conn.source_node == conn.target_node {
                return Err(GraphError::SelfLoop(conn.source_node.clone()));
            }

            graph.add_edge(*source, *target, ());
            outgoing
                .entry(conn.source_node.clone())
                .or_default()
                .push(conn.clone());
            incoming
                .entry(conn.target_node.clone())
                .or_default()
                .push(conn.clone());
        }

        let order = kahn_order(&graph)?;

        let roots = order
            .iter()
            .filter(|id| !incoming.contains_key(*id))
            .cloned()
            .collect();

        Ok(Self {
            nodes,
            incoming,
            outgoing,
            roots,
            order,
        })
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes with no incoming connections; the only nodes that run without
    /// upstream data.
    pub fn root_nodes(&self) -> &[NodeId] {
        &self.roots
    }

    /// Incoming connections of a node, in declaration order.
    pub fn incoming(&self, id: &str) -> &[ConnectionSpec] {
        self.incoming.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Outgoing connections of a node, in declaration order.
    pub fn outgoing(&self, id: &str) -> &[ConnectionSpec] {
        self.outgoing.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All node ids in one valid topological order.
    pub fn topological_order(&self) -> &[NodeId] {
        &self.order
    }
}

/// Kahn's algorithm: repeatedly remove zero-indegree nodes; if any node is
/// left when the frontier empties, the graph has a cycle.
fn kahn_order(graph: &DiGraph<NodeId, ()>) -> Result<Vec<NodeId>, GraphError> {
    let mut indegree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|idx| {
            (
                idx,
                graph.neighbors_directed(idx, Direction::Incoming).count(),
            )
        })
        .collect();

    let mut frontier: VecDeque<NodeIndex> = graph
        .node_indices()
        .filter(|idx| indegree[idx] == 0)
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(idx) = frontier.pop_front() {
        order.push(graph[idx].clone());
        for next in graph.neighbors_directed(idx, Direction::Outgoing) {
            let remaining = indegree.get_mut(&next).unwrap();
            *remaining -= 1;
            if *remaining == 0 {
                frontier.push_back(next);
            }
        }
    }

    if order.len() < graph.node_count() {
        return Err(GraphError::Cycle);
    }
    Ok(order)
}
