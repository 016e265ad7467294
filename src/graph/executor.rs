// SPDX-License-Identifier: MIT

//! Round-based graph executor.
//!
//! Execution proceeds in rounds: every runnable node runs concurrently
//! against a cloned snapshot of the merged state, the round barrier waits for
//! all of them, their updates are folded in through the reducer registry, and
//! outgoing edges decide the next frontier.
//!
//! Readiness rules:
//! - A node's first execution waits until every static in-edge whose source
//!   has itself executed has fired (START counts as executed) — the fan-in
//!   barrier for joins.
//! - An edge firing into an already-executed node re-arms it unconditionally;
//!   a loop-back is just an ordinary edge pointing at an already-executed
//!   node, bounded by routing logic via the visit counters, not the engine.
//! - A conditional edge's routed activation arms its target directly.

use futures::future;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::error::{ExecutionError, RunError};
use super::state::{ReducerRegistry, State};
use super::types::{Graph, END, START};

/// Absolute round ceiling guarding against runaway routing loops.
pub const DEFAULT_MAX_ROUNDS: u32 = 1000;

pub struct Executor {
    graph: Graph,
    reducers: ReducerRegistry,
    max_rounds: u32,
}

impl Executor {
    pub fn new(graph: Graph, reducers: ReducerRegistry) -> Self {
        Self {
            graph,
            reducers,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    /// Override the defensive round ceiling.
    pub fn with_max_rounds(mut self, limit: u32) -> Self {
        self.max_rounds = limit;
        self
    }

    /// Execute the graph to completion from `initial`.
    ///
    /// Returns the final merged state once END is activated or the frontier
    /// empties. On failure the error carries the last merged state.
    pub async fn run(&self, initial: State) -> Result<State, RunError> {
        let run_id = uuid::Uuid::new_v4();
        log::info!(
            "starting run {} ({} nodes, {} edges)",
            run_id,
            self.graph.node_count(),
            self.graph.edge_count()
        );

        let mut state = initial;
        // Static in-edges fired per target, cleared when the target runs.
        let mut fired: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        // Nodes that have executed at least once.
        let mut executed: BTreeSet<String> = BTreeSet::new();
        let mut frontier: BTreeSet<String> = BTreeSet::new();
        let mut end_reached = false;

        // START fires its edges against the initial state.
        for to in self.graph.successors(START) {
            if to == END {
                end_reached = true;
                continue;
            }
            fired.entry(to.clone()).or_default().insert(START.to_string());
            self.try_arm(to, &state, &fired, &executed, &mut frontier);
        }
        if let Some(cond) = self.graph.conditional(START) {
            let label = (cond.router)(&state);
            match cond.targets.get(&label) {
                Some(target) if target == END => end_reached = true,
                Some(target) => {
                    fired.remove(target);
                    frontier.insert(target.clone());
                }
                None => {
                    return Err(RunError {
                        error: ExecutionError::UnmappedLabel {
                            node: START.to_string(),
                            label,
                        },
                        state,
                    })
                }
            }
        }

        let mut round: u32 = 0;
        while !frontier.is_empty() && !end_reached {
            round += 1;
            if round > self.max_rounds {
                log::error!("run {} exceeded {} rounds, aborting", run_id, self.max_rounds);
                return Err(RunError {
                    error: ExecutionError::RoundCeiling {
                        limit: self.max_rounds,
                    },
                    state,
                });
            }

            let batch: Vec<String> = frontier.iter().cloned().collect();
            frontier = BTreeSet::new();
            for id in &batch {
                fired.remove(id);
            }

            log::info!("run {} round {}: executing {:?}", run_id, round, batch);

            let snapshot = state.clone();
            let results = future::join_all(batch.iter().map(|id| {
                let node = Arc::clone(self.graph.node(id));
                let snap = &snapshot;
                let id = id.clone();
                async move {
                    let result = node.run(snap).await;
                    (id, result)
                }
            }))
            .await;

            // Merge in lexicographic node-id order (the batch is sorted), so
            // overwrite collisions resolve deterministically: last writer in
            // id order wins. The first failure in that order aborts the run;
            // sibling results are discarded and the pre-round state surfaces.
            let mut updates = Vec::with_capacity(results.len());
            for (id, result) in results {
                match result {
                    Ok(update) => updates.push((id, update)),
                    Err(cause) => {
                        log::error!("run {} round {}: node {} failed: {}", run_id, round, id, cause);
                        return Err(RunError {
                            error: ExecutionError::NodeFailed { node: id, cause },
                            state,
                        });
                    }
                }
            }

            for (id, update) in updates {
                if !update.is_empty() {
                    log::debug!(
                        "run {} round {}: merging {} field(s) from {}",
                        run_id,
                        round,
                        update.iter().count(),
                        id
                    );
                }
                state.apply(&self.reducers, update);
                state.record_visit(&id);
                executed.insert(id);
            }

            // Resolve outgoing edges, in node-id order.
            for id in &batch {
                for to in self.graph.successors(id) {
                    if to == END {
                        end_reached = true;
                        continue;
                    }
                    fired.entry(to.clone()).or_default().insert(id.clone());
                    self.try_arm(to, &state, &fired, &executed, &mut frontier);
                }

                if let Some(cond) = self.graph.conditional(id) {
                    let label = (cond.router)(&state);
                    match cond.targets.get(&label) {
                        Some(target) if target == END => {
                            log::info!("run {} round {}: {} routed '{}' to end", run_id, round, id, label);
                            end_reached = true;
                        }
                        Some(target) => {
                            log::info!(
                                "run {} round {}: {} routed '{}' -> {}",
                                run_id,
                                round,
                                id,
                                label,
                                target
                            );
                            // Routed activations are fresh triggers; stale
                            // join marks do not carry into the new wave.
                            fired.remove(target);
                            frontier.insert(target.clone());
                        }
                        None => {
                            return Err(RunError {
                                error: ExecutionError::UnmappedLabel {
                                    node: id.clone(),
                                    label,
                                },
                                state,
                            })
                        }
                    }
                }
            }
        }

        log::info!("run {} finished after {} round(s)", run_id, round);
        Ok(state)
    }

    /// Schedule `target` for the next round if its readiness rule is met.
    fn try_arm(
        &self,
        target: &str,
        state: &State,
        fired: &BTreeMap<String, BTreeSet<String>>,
        executed: &BTreeSet<String>,
        next: &mut BTreeSet<String>,
    ) {
        if state.visits(target) > 0 {
            // Loop-back firing: an already-executed node re-arms on any edge.
            next.insert(target.to_string());
            return;
        }

        // First visit: every predecessor that has itself executed must have
        // fired. Predecessors that have never run cannot be waited on without
        // deadlocking cycle entries; if one fires later, the revisit rule
        // above re-arms the node.
        let fired_into = fired.get(target);
        let satisfied = self
            .graph
            .predecessors(target)
            .iter()
            .filter(|p| p.as_str() == START || executed.contains(p.as_str()))
            .all(|p| fired_into.map_or(false, |set| set.contains(p)));

        if satisfied {
            next.insert(target.to_string());
        }
    }
}
