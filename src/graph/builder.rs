// SPDX-License-Identifier: MIT

//! Graph construction and structural validation.
//!
//! `add_*` methods fail fast on local defects (duplicate ids, undeclared
//! endpoints). `build()` then checks whole-graph properties and reports every
//! violation it finds in one error.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use super::error::{BuildError, GraphValidationError, Violation};
use super::node::Node;
use super::types::{ConditionalEdge, Edge, Graph, Router, END, START};

#[derive(Default)]
pub struct GraphBuilder {
    nodes: BTreeMap<String, Arc<dyn Node>>,
    edges: Vec<Edge>,
    conditional: BTreeMap<String, ConditionalEdge>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a node. Ids must be unique; the start/end markers are reserved.
    pub fn add_node(
        &mut self,
        id: impl Into<String>,
        node: Arc<dyn Node>,
    ) -> Result<&mut Self, BuildError> {
        let id = id.into();
        if id == START || id == END {
            return Err(BuildError::ReservedId(id));
        }
        if self.nodes.contains_key(&id) {
            return Err(BuildError::DuplicateNode(id));
        }
        self.nodes.insert(id, node);
        Ok(self)
    }

    /// Add a static edge. Both endpoints must already be declared; `START` is
    /// a valid source and `END` a valid target.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<&mut Self, BuildError> {
        self.check_source(from)?;
        self.check_target(to)?;
        self.edges.push(Edge {
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(self)
    }

    /// Attach a conditional edge to `from`. Every label's target must already
    /// be declared (`END` allowed); one conditional edge per owner.
    pub fn add_conditional_edge<L, T>(
        &mut self,
        from: &str,
        router: Router,
        targets: impl IntoIterator<Item = (L, T)>,
    ) -> Result<&mut Self, BuildError>
    where
        L: Into<String>,
        T: Into<String>,
    {
        self.check_source(from)?;
        if self.conditional.contains_key(from) {
            return Err(BuildError::DuplicateConditionalEdge(from.to_string()));
        }

        let mut map = BTreeMap::new();
        for (label, target) in targets {
            let target = target.into();
            self.check_target(&target)?;
            map.insert(label.into(), target);
        }
        if map.is_empty() {
            return Err(BuildError::EmptyLabelMap(from.to_string()));
        }

        self.conditional.insert(
            from.to_string(),
            ConditionalEdge {
                from: from.to_string(),
                router,
                targets: map,
            },
        );
        Ok(self)
    }

    /// Validate the whole graph and freeze it. Collects ALL violations before
    /// failing, so one round-trip surfaces every structural defect.
    pub fn build(self) -> Result<Graph, GraphValidationError> {
        let mut violations = Vec::new();

        let start_has_static = self.edges.iter().any(|e| e.from == START);
        if !start_has_static && !self.conditional.contains_key(START) {
            violations.push(Violation::NoEntry);
        }

        let reachable = self.reachable_from_start();
        for id in self.nodes.keys() {
            if !reachable.contains(id.as_str()) {
                violations.push(Violation::Unreachable(id.clone()));
            }
        }

        if !violations.is_empty() {
            return Err(GraphValidationError { violations });
        }

        let mut successors: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut predecessors: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for edge in &self.edges {
            successors
                .entry(edge.from.clone())
                .or_default()
                .push(edge.to.clone());
            predecessors
                .entry(edge.to.clone())
                .or_default()
                .push(edge.from.clone());
        }

        Ok(Graph {
            nodes: self.nodes,
            edges: self.edges,
            conditional: self.conditional,
            successors,
            predecessors,
        })
    }

    fn check_source(&self, id: &str) -> Result<(), BuildError> {
        if id == START || self.nodes.contains_key(id) {
            Ok(())
        } else {
            Err(BuildError::UnknownNode(id.to_string()))
        }
    }

    fn check_target(&self, id: &str) -> Result<(), BuildError> {
        if id == END || self.nodes.contains_key(id) {
            Ok(())
        } else {
            Err(BuildError::UnknownNode(id.to_string()))
        }
    }

    /// Nodes reachable from START over static edges and conditional targets.
    fn reachable_from_start(&self) -> BTreeSet<&str> {
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(START);

        while let Some(current) = queue.pop_front() {
            for edge in self.edges.iter().filter(|e| e.from == current) {
                if edge.to != END && visited.insert(&edge.to) {
                    queue.push_back(&edge.to);
                }
            }
            if let Some(cond) = self.conditional.get(current) {
                for target in cond.targets.values() {
                    if target != END && visited.insert(target) {
                        queue.push_back(target);
                    }
                }
            }
        }

        visited
    }
}
