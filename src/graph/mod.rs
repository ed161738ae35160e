//! Workload graph
//!
//! Nodes live in a flat arena owned by the `Graph`; edges and structural
//! references hold `NodeId` indices, so cycles and back-edges need no shared
//! ownership. A graph is immutable once built and is shared read-only by every
//! worker through an `Arc`.
//!
//! # Edge selection
//!
//! Successors are chosen by weighted sampling over `[0, total_weight)` with the
//! worker's private RNG, walking the cumulative weights. Zero-weight edges are
//! never chosen, and a node whose weights sum to zero (or that has no edges)
//! ends the walk.

pub mod builder;
pub mod dot;

pub use builder::build_graph;

use crate::config::workload::FailureAction;
use crate::operation::{Condition, Operation};
use rand::Rng;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Index of a node in its graph's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Weighted outgoing edge
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub target: NodeId,
    pub weight: f64,
}

/// Resolved per-node failure handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureRoute {
    Action(FailureAction),
    /// Continue the walk at this node instead of selecting a successor
    Goto(NodeId),
}

/// What a node does when the walk reaches it
#[derive(Debug, Clone)]
pub enum NodeKind {
    Operation(Operation),
    /// Route on a condition over thread variables
    Branch {
        condition: Condition,
        then: NodeId,
        otherwise: NodeId,
    },
    /// Walk the sub-graph starting at `body` `count` times
    Loop {
        count: u64,
        body: NodeId,
        counter: Option<String>,
    },
    /// Walk every branch concurrently and join
    Fork { branches: Vec<NodeId> },
    /// Explicit end of the walk
    Finish,
}

impl NodeKind {
    /// Label used in statistics and graph exports
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Operation(op) => op.kind(),
            NodeKind::Branch { .. } => "branch",
            NodeKind::Loop { .. } => "loop",
            NodeKind::Fork { .. } => "fork",
            NodeKind::Finish => "finish",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    stat_key: Arc<str>,
    kind: NodeKind,
    edges: Vec<Edge>,
    total_weight: f64,
    on_failure: Option<FailureRoute>,
}

impl Node {
    pub(crate) fn new(
        name: String,
        stat_key: Arc<str>,
        kind: NodeKind,
        edges: Vec<Edge>,
        on_failure: Option<FailureRoute>,
    ) -> Self {
        let total_weight = edges.iter().map(|e| e.weight).sum();
        Self {
            name,
            stat_key,
            kind,
            edges,
            total_weight,
            on_failure,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key this node's samples are aggregated under
    ///
    /// Equal to the name for nodes of the top-level workload and
    /// `<workload>/<name>` for nodes of sub-workloads.
    pub fn stat_key(&self) -> &Arc<str> {
        &self.stat_key
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Node-level failure policy, if the node overrides the run default
    pub fn on_failure(&self) -> Option<FailureRoute> {
        self.on_failure
    }

    pub fn is_terminal(&self) -> bool {
        self.total_weight <= 0.0
    }

    /// Pick the next node by weight; `None` ends the walk
    pub fn select_next<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<NodeId> {
        if self.is_terminal() {
            return None;
        }
        if let [only] = self.edges.as_slice() {
            return Some(only.target);
        }

        let roll = rng.gen_range(0.0..self.total_weight);
        let mut cumulative = 0.0;
        for edge in &self.edges {
            cumulative += edge.weight;
            if roll < cumulative {
                return Some(edge.target);
            }
        }

        // Rounding can leave roll just past the last boundary
        self.edges.iter().rev().find(|e| e.weight > 0.0).map(|e| e.target)
    }
}

/// Immutable workload graph
#[derive(Debug, Clone)]
pub struct Graph {
    name: String,
    nodes: Vec<Node>,
    entry: NodeId,
    variables: BTreeMap<String, Value>,
}

impl Graph {
    pub(crate) fn new(
        name: String,
        nodes: Vec<Node>,
        entry: NodeId,
        variables: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            name,
            nodes,
            entry,
            variables,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> NodeId {
        self.entry
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name).map(NodeId)
    }

    /// Initial values of each worker's variables
    pub fn variables(&self) -> &BTreeMap<String, Value> {
        &self.variables
    }

    /// Iterate `(id, node)` pairs in arena order
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }
}
