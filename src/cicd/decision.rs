// SPDX-License-Identifier: MIT

//! Error aggregation and the fix/release/fail decision.
//!
//! `decide_next_action` is a pure function of state. The `Decide` node only
//! records the decision; the conditional edge re-evaluates the same function
//! to pick the route, so node and router can never disagree.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;

use crate::graph::{Node, NodeError, State, StateUpdate};

use super::state::{
    collected_errors, fix_attempts, keys, total_errors, validation_findings, Category,
    PipelineStatus, Severity,
};

/// Closed set of routing outcomes out of the decision point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    Release,
    Fix,
    Fail,
}

impl NextAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            NextAction::Release => "release",
            NextAction::Fix => "fix",
            NextAction::Fail => "fail",
        }
    }
}

impl fmt::Display for NextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// No errors → release. Otherwise the first category (in priority order) with
/// errors and attempts left gets a fix cycle; with every errored category
/// exhausted, the run fails.
pub fn decide_next_action(state: &State) -> NextAction {
    let collected = collected_errors(state);
    if total_errors(&collected) == 0 {
        return NextAction::Release;
    }

    let attempts = fix_attempts(state);
    for category in Category::ALL {
        let has_errors = collected
            .get(category.as_str())
            .map(|errs| !errs.is_empty())
            .unwrap_or(false);
        if !has_errors {
            continue;
        }
        let can_retry = attempts
            .get(category.as_str())
            .map(|a| !a.exhausted())
            .unwrap_or(true);
        if can_retry {
            return NextAction::Fix;
        }
    }

    NextAction::Fail
}

/// Aggregate the round's findings into per-category and per-file error lists.
/// Warnings are logged but never drive the fix loop.
pub struct CollectErrors;

#[async_trait]
impl Node for CollectErrors {
    async fn run(&self, state: &State) -> Result<StateUpdate, NodeError> {
        let findings_map = validation_findings(state);
        let mut collected: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut by_file: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for category in Category::ALL {
            let entry = collected.entry(category.as_str().to_string()).or_default();
            let Some(findings) = findings_map.get(category.as_str()) else {
                continue;
            };
            for finding in findings {
                if finding.severity != Severity::Error {
                    log::debug!("{}: warning: {}", finding.file, finding.message);
                    continue;
                }
                entry.push(format!("{}: {}", finding.file, finding.message));
                by_file
                    .entry(finding.file.clone())
                    .or_default()
                    .push(finding.message.clone());
            }
        }

        let total = total_errors(&collected);
        log::info!("validation complete, {} error(s) found", total);
        for (category, errors) in &collected {
            if !errors.is_empty() {
                log::info!("  {}: {} error(s)", category, errors.len());
            }
        }

        Ok(StateUpdate::of(keys::COLLECTED_ERRORS, json!(collected))
            .with(keys::ERRORS_BY_FILE, json!(by_file)))
    }
}

/// Record the routing decision; the conditional edge acts on it.
pub struct Decide;

#[async_trait]
impl Node for Decide {
    async fn run(&self, state: &State) -> Result<StateUpdate, NodeError> {
        let action = decide_next_action(state);
        log::info!("next action: {}", action);

        let mut update = StateUpdate::of(keys::DECISION_HISTORY, json!([action.as_str()]));
        if action == NextAction::Fix {
            update.set(keys::STATUS, json!(PipelineStatus::Fixing.as_str()));
        }
        Ok(update)
    }
}

/// All validations passed; mark the state ready for the release chain.
pub struct PrepareRelease;

#[async_trait]
impl Node for PrepareRelease {
    async fn run(&self, _state: &State) -> Result<StateUpdate, NodeError> {
        log::info!("all validations passed, preparing release");
        Ok(StateUpdate::of(keys::RELEASE_READY, json!(true))
            .with(keys::STATUS, json!(PipelineStatus::Releasing.as_str())))
    }
}

/// Dry-run stand-in for the release chain: validation succeeded, stop here.
pub struct SkipRelease;

#[async_trait]
impl Node for SkipRelease {
    async fn run(&self, _state: &State) -> Result<StateUpdate, NodeError> {
        log::info!("validation passed; skipping release (dry run)");
        Ok(StateUpdate::of(keys::STATUS, json!(PipelineStatus::Success.as_str())))
    }
}

/// Terminal failure: every errored category is out of attempts.
pub struct FailWorkflow;

#[async_trait]
impl Node for FailWorkflow {
    async fn run(&self, state: &State) -> Result<StateUpdate, NodeError> {
        let collected = collected_errors(state);
        let total = total_errors(&collected);
        let message = format!("max fix attempts reached, {} error(s) remain", total);

        log::error!("workflow failed: {}", message);
        for (category, errors) in &collected {
            if errors.is_empty() {
                continue;
            }
            log::error!("{}:", category);
            for error in errors.iter().take(5) {
                log::error!("  - {}", error);
            }
            if errors.len() > 5 {
                log::error!("  ... and {} more", errors.len() - 5);
            }
        }

        Ok(StateUpdate::of(keys::STATUS, json!(PipelineStatus::Failed.as_str()))
            .with(keys::ERROR_MESSAGE, json!(message)))
    }
}
