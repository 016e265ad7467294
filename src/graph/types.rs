// SPDX-License-Identifier: MIT

//! Graph structure: nodes, edges, conditional edges, and the built graph.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::node::Node;
use super::state::State;

/// Virtual entry marker. Edges out of it define the initial frontier.
pub const START: &str = "__start__";
/// Virtual exit marker. Activating it ends the run.
pub const END: &str = "__end__";

/// Routing function: a pure function from state to a label, resolved through
/// a conditional edge's label map.
pub type Router = Arc<dyn Fn(&State) -> String + Send + Sync>;

/// Unconditional edge, taken once `from` completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

/// Conditional edge owned by `from`: after `from` completes and the round is
/// merged, `router` is evaluated once and the produced label selects a target
/// from `targets`. A label absent from the map aborts the run.
pub struct ConditionalEdge {
    pub from: String,
    pub router: Router,
    pub targets: BTreeMap<String, String>,
}

/// An immutable, validated workflow graph. Built by
/// [`GraphBuilder`](super::builder::GraphBuilder); construction elsewhere is
/// not possible, so every `Graph` in circulation has passed validation.
pub struct Graph {
    pub(crate) nodes: BTreeMap<String, Arc<dyn Node>>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) conditional: BTreeMap<String, ConditionalEdge>,
    /// Static-edge adjacency, `from` → targets, including START's edges.
    pub(crate) successors: BTreeMap<String, Vec<String>>,
    /// Static-edge reverse adjacency, `to` → sources.
    pub(crate) predecessors: BTreeMap<String, Vec<String>>,
}

impl Graph {
    /// The executable node registered under `id`.
    ///
    /// Panics on an unknown id; the builder guarantees every scheduled id is
    /// declared, so this is an internal invariant, not a caller error.
    pub(crate) fn node(&self, id: &str) -> &Arc<dyn Node> {
        &self.nodes[id]
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Static-edge targets of `id` (empty when it has none).
    pub fn successors(&self, id: &str) -> &[String] {
        self.successors.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Static-edge sources of `id` (empty when it has none).
    pub fn predecessors(&self, id: &str) -> &[String] {
        self.predecessors.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn conditional(&self, id: &str) -> Option<&ConditionalEdge> {
        self.conditional.get(id)
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("edges", &self.edges)
            .field(
                "conditional",
                &self.conditional.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}
