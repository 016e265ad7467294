// SPDX-License-Identifier: MIT

//! The workflow graph engine.
//!
//! Nodes transform state; static and conditional edges connect them; the
//! executor runs rounds of concurrent nodes and merges their updates through
//! per-field reducers.

pub mod builder;
pub mod error;
pub mod executor;
pub mod node;
pub mod state;
pub mod types;

pub use builder::GraphBuilder;
pub use error::{BuildError, ExecutionError, GraphValidationError, RunError, Violation};
pub use executor::{Executor, DEFAULT_MAX_ROUNDS};
pub use node::{FnNode, Node, NodeError};
pub use state::{Reducer, ReducerRegistry, State, StateUpdate};
pub use types::{ConditionalEdge, Edge, Graph, Router, END, START};
