//! Integration tests for the graph engine: determinism, the fan-in barrier,
//! reducer laws under concurrency, and loop safety.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gantry_rs::graph::{
    Executor, ExecutionError, FnNode, GraphBuilder, Node, NodeError, Reducer, ReducerRegistry,
    Router, State, StateUpdate, END, START,
};

// ============================================================================
// Mock Nodes
// ============================================================================

/// Sleeps, then appends its name to a shared event log and a state field.
struct DelayedNode {
    name: String,
    delay: Duration,
    log: Arc<Mutex<Vec<String>>>,
}

impl DelayedNode {
    fn new(name: &str, delay_ms: u64, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            delay: Duration::from_millis(delay_ms),
            log,
        }
    }
}

#[async_trait]
impl Node for DelayedNode {
    async fn run(&self, _state: &State) -> Result<StateUpdate, NodeError> {
        tokio::time::sleep(self.delay).await;
        self.log.lock().unwrap().push(self.name.clone());
        Ok(StateUpdate::of("events", json!([self.name])))
    }
}

/// Counts its executions and records the predecessor fields it observed.
struct JoinProbe {
    runs: Arc<AtomicU32>,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Node for JoinProbe {
    async fn run(&self, state: &State) -> Result<StateUpdate, NodeError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push("join".to_string());
        let seen = state
            .get("events")
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0);
        Ok(StateUpdate::of("seen_at_join", json!(seen)))
    }
}

// ============================================================================
// Determinism
// ============================================================================

fn diamond_graph() -> (GraphBuilder, ReducerRegistry) {
    let mut builder = GraphBuilder::new();
    builder
        .add_node(
            "source",
            Arc::new(FnNode::new(|_: &State| {
                Ok(StateUpdate::of("total", json!(1)))
            })),
        )
        .unwrap();
    for id in ["branch_a", "branch_b", "branch_c"] {
        builder
            .add_node(
                id,
                Arc::new(FnNode::new(move |_: &State| {
                    Ok(StateUpdate::new()
                        .with("total", json!(10))
                        .with("tags", json!([id]))
                        .with("last", json!(id)))
                })),
            )
            .unwrap();
        builder.add_edge("source", id).unwrap();
    }
    builder
        .add_node(
            "sink",
            Arc::new(FnNode::new(|_: &State| Ok(StateUpdate::new()))),
        )
        .unwrap();
    for id in ["branch_a", "branch_b", "branch_c"] {
        builder.add_edge(id, "sink").unwrap();
    }
    builder.add_edge(START, "source").unwrap();
    builder.add_edge("sink", END).unwrap();

    let reducers = ReducerRegistry::new()
        .with("total", Reducer::Sum)
        .with("tags", Reducer::Union);
    (builder, reducers)
}

#[tokio::test]
async fn test_identical_runs_produce_identical_state() {
    let mut finals = Vec::new();
    for _ in 0..2 {
        let (builder, reducers) = diamond_graph();
        let executor = Executor::new(builder.build().unwrap(), reducers);
        let state = executor.run(State::new()).await.unwrap();
        finals.push(state);
    }

    assert_eq!(finals[0].to_json(), finals[1].to_json());
    for id in ["source", "branch_a", "branch_b", "branch_c", "sink"] {
        assert_eq!(finals[0].visits(id), finals[1].visits(id));
    }
}

#[tokio::test]
async fn test_overwrite_tie_break_is_stable() {
    let (builder, reducers) = diamond_graph();
    let executor = Executor::new(builder.build().unwrap(), reducers);
    let state = executor.run(State::new()).await.unwrap();

    // Lexicographically last sibling wins, regardless of completion order.
    assert_eq!(state.get("last"), Some(&json!("branch_c")));
    // Sum reducer: 1 from source + 10 per branch.
    assert_eq!(state.get("total"), Some(&json!(31)));
    // Union reducer: one tag per branch, no duplicates.
    assert_eq!(state.get("tags"), Some(&json!(["branch_a", "branch_b", "branch_c"])));
}

// ============================================================================
// Fan-in barrier
// ============================================================================

#[tokio::test]
async fn test_join_never_runs_before_all_predecessors() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let runs = Arc::new(AtomicU32::new(0));

    let mut builder = GraphBuilder::new();
    // Deliberately uneven delays: the slowest predecessor finishes last, the
    // join must still only fire once, after all three.
    builder
        .add_node("p1", Arc::new(DelayedNode::new("p1", 80, log.clone())))
        .unwrap();
    builder
        .add_node("p2", Arc::new(DelayedNode::new("p2", 5, log.clone())))
        .unwrap();
    builder
        .add_node("p3", Arc::new(DelayedNode::new("p3", 30, log.clone())))
        .unwrap();
    builder
        .add_node(
            "join",
            Arc::new(JoinProbe {
                runs: runs.clone(),
                log: log.clone(),
            }),
        )
        .unwrap();
    builder.add_edge(START, "p1").unwrap();
    builder.add_edge(START, "p2").unwrap();
    builder.add_edge(START, "p3").unwrap();
    builder.add_edge("p1", "join").unwrap();
    builder.add_edge("p2", "join").unwrap();
    builder.add_edge("p3", "join").unwrap();
    builder.add_edge("join", END).unwrap();

    let reducers = ReducerRegistry::new().with("events", Reducer::Append);
    let executor = Executor::new(builder.build().unwrap(), reducers);
    let state = executor.run(State::new()).await.unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    // The join observed all three predecessor events in its snapshot.
    assert_eq!(state.get("seen_at_join"), Some(&json!(3)));

    let events = log.lock().unwrap().clone();
    assert_eq!(events.len(), 4);
    assert_eq!(events[3], "join");
}

// ============================================================================
// Reducer laws under swapped completion order
// ============================================================================

#[tokio::test]
async fn test_sum_result_is_independent_of_completion_order() {
    let mut totals = Vec::new();
    for delays in [[50u64, 5], [5, 50]] {
        let mut builder = GraphBuilder::new();
        for (i, delay) in delays.iter().enumerate() {
            let id = format!("n{}", i);
            let delay = *delay;
            builder
                .add_node(
                    id.clone(),
                    Arc::new(FnNodeAsync { delay_ms: delay, amount: (i as i64 + 1) * 10 }),
                )
                .unwrap();
            builder.add_edge(START, &id).unwrap();
        }

        let reducers = ReducerRegistry::new().with("total", Reducer::Sum);
        let executor = Executor::new(builder.build().unwrap(), reducers);
        let state = executor.run(State::new()).await.unwrap();
        totals.push(state.get("total").cloned());
    }

    assert_eq!(totals[0], totals[1]);
    assert_eq!(totals[0], Some(json!(30)));
}

struct FnNodeAsync {
    delay_ms: u64,
    amount: i64,
}

#[async_trait]
impl Node for FnNodeAsync {
    async fn run(&self, _state: &State) -> Result<StateUpdate, NodeError> {
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        Ok(StateUpdate::of("total", json!(self.amount)))
    }
}

// ============================================================================
// Cycle safety
// ============================================================================

#[tokio::test]
async fn test_always_fix_router_hits_round_ceiling() {
    let router: Router = Arc::new(|_: &State| "fix".to_string());

    let mut builder = GraphBuilder::new();
    builder
        .add_node(
            "check",
            Arc::new(FnNode::new(|_: &State| Ok(StateUpdate::new()))),
        )
        .unwrap();
    builder
        .add_node(
            "fixup",
            Arc::new(FnNode::new(|_: &State| Ok(StateUpdate::new()))),
        )
        .unwrap();
    builder.add_edge(START, "check").unwrap();
    builder
        .add_conditional_edge("check", router, [("fix", "fixup"), ("done", END)])
        .unwrap();
    builder.add_edge("fixup", "check").unwrap();

    let executor =
        Executor::new(builder.build().unwrap(), ReducerRegistry::new()).with_max_rounds(40);
    let err = executor.run(State::new()).await.err().unwrap();

    assert!(matches!(
        err.error,
        ExecutionError::RoundCeiling { limit: 40 }
    ));
    // Visit counters up to the abort are preserved for diagnostics.
    assert!(err.state.visits("check") > 1);
}

#[tokio::test]
async fn test_visit_counters_bound_a_loop() {
    let router: Router = Arc::new(|state: &State| {
        if state.visits("worker") < 5 {
            "again".to_string()
        } else {
            "done".to_string()
        }
    });

    let mut builder = GraphBuilder::new();
    builder
        .add_node(
            "worker",
            Arc::new(FnNode::new(|_: &State| {
                Ok(StateUpdate::of("laps", json!(1)))
            })),
        )
        .unwrap();
    builder.add_edge(START, "worker").unwrap();
    builder
        .add_conditional_edge("worker", router, [("again", "worker"), ("done", END)])
        .unwrap();

    let reducers = ReducerRegistry::new().with("laps", Reducer::Sum);
    let executor = Executor::new(builder.build().unwrap(), reducers);
    let state = executor.run(State::new()).await.unwrap();

    assert_eq!(state.visits("worker"), 5);
    assert_eq!(state.get("laps"), Some(&json!(5)));
}
