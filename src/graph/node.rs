// SPDX-License-Identifier: MIT

//! The node contract: a state-transforming unit consumed by the graph.

use async_trait::async_trait;

use super::state::{State, StateUpdate};

/// Error type nodes surface to the engine; wrapped into
/// [`ExecutionError::NodeFailed`](super::error::ExecutionError) with the
/// owning node's id attached.
pub type NodeError = Box<dyn std::error::Error + Send + Sync>;

/// A unit of work in the graph.
///
/// A node receives an immutable snapshot of the merged state and returns the
/// fields it wants to change. It must not assume any ordering relative to
/// other nodes running in the same round; the engine applies all merging.
#[async_trait]
pub trait Node: Send + Sync {
    async fn run(&self, state: &State) -> Result<StateUpdate, NodeError>;
}

/// Adapter turning a plain closure into a [`Node`].
pub struct FnNode<F> {
    f: F,
}

impl<F> FnNode<F>
where
    F: Fn(&State) -> Result<StateUpdate, NodeError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Node for FnNode<F>
where
    F: Fn(&State) -> Result<StateUpdate, NodeError> + Send + Sync,
{
    async fn run(&self, state: &State) -> Result<StateUpdate, NodeError> {
        (self.f)(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_node_runs_closure() {
        let node = FnNode::new(|state: &State| {
            let n = state.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(StateUpdate::of("n", json!(n + 1)))
        });

        let state = State::new().with("n", json!(41));
        let update = node.run(&state).await.unwrap();
        let mut expected = StateUpdate::new();
        expected.set("n", json!(42));
        assert_eq!(update, expected);
    }

    #[tokio::test]
    async fn test_fn_node_propagates_error() {
        let node = FnNode::new(|_: &State| Err("boom".into()));
        let err = node.run(&State::new()).await.err().unwrap();
        assert_eq!(err.to_string(), "boom");
    }
}
