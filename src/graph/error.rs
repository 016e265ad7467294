// SPDX-License-Identifier: MIT

//! Typed errors for graph construction and execution.

use thiserror::Error;

use super::node::NodeError;
use super::state::State;

/// Fail-fast errors raised by the builder's `add_*` methods.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("node '{0}' is already defined")]
    DuplicateNode(String),

    #[error("'{0}' is a reserved id")]
    ReservedId(String),

    #[error("edge references unknown node '{0}'")]
    UnknownNode(String),

    #[error("node '{0}' already has a conditional edge")]
    DuplicateConditionalEdge(String),

    #[error("conditional edge on '{0}' has an empty label map")]
    EmptyLabelMap(String),
}

/// A single structural defect found by `build()`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Violation {
    #[error("node '{0}' is not reachable from the start marker")]
    Unreachable(String),

    #[error("the start marker has no outgoing edge")]
    NoEntry,
}

/// Structural validation failure. Carries every violation found, not just the
/// first, so one build round-trip surfaces all defects.
#[derive(Debug)]
pub struct GraphValidationError {
    pub violations: Vec<Violation>,
}

impl std::fmt::Display for GraphValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph validation failed:")?;
        for violation in &self.violations {
            writeln!(f, "  - {}", violation)?;
        }
        Ok(())
    }
}

impl std::error::Error for GraphValidationError {}

/// Errors aborting a run.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A node's own logic failed. The engine never retries; recovery is a
    /// routing concern, not an engine one.
    #[error("node '{node}' failed: {cause}")]
    NodeFailed { node: String, cause: NodeError },

    /// A router produced a label absent from its edge's map. Indicates a
    /// defect in graph assembly or routing logic.
    #[error("routing on '{node}' produced unmapped label '{label}'")]
    UnmappedLabel { node: String, label: String },

    /// The absolute round ceiling was exceeded; routing logic is looping
    /// without bound.
    #[error("execution exceeded the safety ceiling of {limit} rounds")]
    RoundCeiling { limit: u32 },
}

/// An aborted run: the error plus the last merged state, for diagnostics.
#[derive(Debug)]
pub struct RunError {
    pub error: ExecutionError,
    pub state: State,
}

impl RunError {
    pub fn into_state(self) -> State {
        self.state
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_lists_all_violations() {
        let err = GraphValidationError {
            violations: vec![
                Violation::NoEntry,
                Violation::Unreachable("orphan".to_string()),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("no outgoing edge"));
        assert!(text.contains("'orphan'"));
    }

    #[test]
    fn test_run_error_displays_inner() {
        let err = RunError {
            error: ExecutionError::RoundCeiling { limit: 10 },
            state: State::new(),
        };
        assert!(err.to_string().contains("10 rounds"));
    }
}
