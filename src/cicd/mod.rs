// SPDX-License-Identifier: MIT

//! CI/CD automation pipeline built on the graph engine: discover
//! infrastructure artifacts, validate them in parallel, aggregate errors,
//! fix and retry up to a ceiling, then release in order.

pub mod config;
pub mod decision;
pub mod discovery;
pub mod fixers;
pub mod pipeline;
pub mod release;
pub mod state;
pub mod tools;
pub mod validators;

pub use config::{ConfigError, PipelineConfig};
pub use decision::{decide_next_action, NextAction};
pub use pipeline::{build_pipeline, run_pipeline, PipelineError};
pub use release::ReleaseError;
pub use state::{
    Category, Finding, FindingKind, FixAttempt, PipelineStatus, ReleaseOutcome, ReleaseRecord,
    Severity,
};
pub use tools::{CommandError, CommandOutput, CommandRunner, ProcessRunner};
