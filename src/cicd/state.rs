// SPDX-License-Identifier: MIT

//! State schema for the CI/CD pipeline: field keys, typed views over the
//! JSON values, reducer registration, and initial-state construction.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;

use crate::graph::{Reducer, ReducerRegistry, State};

use super::config::PipelineConfig;

/// State field keys. Nodes address fields through these, never ad-hoc strings.
pub mod keys {
    /// Caller-supplied root paths to scan.
    pub const ROOTS: &str = "roots";
    /// Discovered file inventory, per category.
    pub const FILES: &str = "files";
    /// Per-category validation findings, replaced wholesale each cycle.
    pub const VALIDATION_RESULTS: &str = "validation_results";
    /// Per-category error strings aggregated by the collect node.
    pub const COLLECTED_ERRORS: &str = "collected_errors";
    /// Error strings grouped by offending file.
    pub const ERRORS_BY_FILE: &str = "errors_by_file";
    /// Per-category retry counters.
    pub const FIX_ATTEMPTS: &str = "fix_attempts";
    /// Every file a fixer touched, across all cycles.
    pub const FILES_FIXED: &str = "files_fixed";
    pub const FIX_APPLIED: &str = "fix_applied";
    pub const RELEASE_READY: &str = "release_ready";
    /// Per-target release records.
    pub const RELEASE_RESULTS: &str = "release_results";
    pub const DOCKER_IMAGES_BUILT: &str = "docker_images_built";
    pub const HELM_CHARTS_RELEASED: &str = "helm_charts_released";
    pub const TERRAFORM_APPLIED: &str = "terraform_applied";
    pub const STATUS: &str = "status";
    pub const ERROR_MESSAGE: &str = "error_message";
    /// Trail of routing decisions, one entry per decision evaluation.
    pub const DECISION_HISTORY: &str = "decision_history";
    /// Names of external tools found missing, deduplicated across the run.
    pub const TOOLS_MISSING: &str = "tools_missing";
    /// Total external commands invoked, summed across all nodes.
    pub const COMMANDS_RUN: &str = "commands_run";
    pub const DRY_RUN: &str = "dry_run";
}

/// Technology track, in fixed fix-priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Terraform,
    Docker,
    Helm,
}

impl Category {
    /// Priority order used by the decision scan.
    pub const ALL: [Category; 3] = [Category::Terraform, Category::Docker, Category::Helm];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Terraform => "terraform",
            Category::Docker => "docker",
            Category::Helm => "helm",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// What produced a finding: an actual lint failure, or the tool itself being
/// unusable. Missing tools are data, not crashes; routing handles them like
/// any other validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    #[default]
    Lint,
    ToolUnavailable,
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub message: String,
    pub severity: Severity,
    #[serde(default)]
    pub kind: FindingKind,
}

impl Finding {
    pub fn error(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: None,
            message: message.into(),
            severity: Severity::Error,
            kind: FindingKind::Lint,
        }
    }

    pub fn tool_unavailable(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: None,
            message: message.into(),
            severity: Severity::Error,
            kind: FindingKind::ToolUnavailable,
        }
    }
}

/// Discovered files, one list per category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileInventory {
    #[serde(default)]
    pub terraform: Vec<String>,
    #[serde(default)]
    pub docker: Vec<String>,
    #[serde(default)]
    pub helm: Vec<String>,
}

impl FileInventory {
    pub fn for_category(&self, category: Category) -> &[String] {
        match category {
            Category::Terraform => &self.terraform,
            Category::Docker => &self.docker,
            Category::Helm => &self.helm,
        }
    }

    pub fn total(&self) -> usize {
        self.terraform.len() + self.docker.len() + self.helm.len()
    }
}

/// Retry counter for one category. Updated only through the merge step, once
/// per fix cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixAttempt {
    pub attempts: u32,
    pub limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<String>,
}

impl FixAttempt {
    pub fn new(limit: u32) -> Self {
        Self {
            attempts: 0,
            limit,
            last_attempt: None,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.limit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseOutcome {
    Success,
    Failed,
    Skipped,
}

/// Result of one release target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub outcome: ReleaseOutcome,
    #[serde(default)]
    pub identifiers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReleaseRecord {
    pub fn skipped() -> Self {
        Self {
            outcome: ReleaseOutcome::Skipped,
            identifiers: Vec::new(),
            error: None,
        }
    }

    pub fn success(identifiers: Vec<String>) -> Self {
        Self {
            outcome: ReleaseOutcome::Success,
            identifiers,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            outcome: ReleaseOutcome::Failed,
            identifiers: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Terminal and intermediate pipeline states, stored under [`keys::STATUS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Running,
    Fixing,
    Releasing,
    Success,
    Failed,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Running => "running",
            PipelineStatus::Fixing => "fixing",
            PipelineStatus::Releasing => "releasing",
            PipelineStatus::Success => "success",
            PipelineStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reducers for every field written by more than one node or more than once.
/// Everything else overwrites.
pub fn reducers() -> ReducerRegistry {
    ReducerRegistry::new()
        .with(keys::VALIDATION_RESULTS, Reducer::Merge)
        .with(keys::FIX_ATTEMPTS, Reducer::Merge)
        .with(keys::RELEASE_RESULTS, Reducer::Merge)
        .with(keys::FILES_FIXED, Reducer::Append)
        .with(keys::DECISION_HISTORY, Reducer::Append)
        .with(keys::TOOLS_MISSING, Reducer::Union)
        .with(keys::COMMANDS_RUN, Reducer::Sum)
}

/// Fresh state for one pipeline run.
pub fn initial_state(roots: &[String], config: &PipelineConfig) -> State {
    let mut attempts = BTreeMap::new();
    for category in Category::ALL {
        attempts.insert(
            category.as_str().to_string(),
            FixAttempt::new(config.max_fix_attempts),
        );
    }

    State::new()
        .with(keys::ROOTS, json!(roots))
        .with(keys::FILES, json!(FileInventory::default()))
        .with(keys::VALIDATION_RESULTS, json!({}))
        .with(keys::COLLECTED_ERRORS, json!({}))
        .with(keys::ERRORS_BY_FILE, json!({}))
        .with(keys::FIX_ATTEMPTS, json!(attempts))
        .with(keys::FILES_FIXED, json!([]))
        .with(keys::FIX_APPLIED, json!(false))
        .with(keys::RELEASE_READY, json!(false))
        .with(keys::RELEASE_RESULTS, json!({}))
        .with(keys::DOCKER_IMAGES_BUILT, json!([]))
        .with(keys::HELM_CHARTS_RELEASED, json!([]))
        .with(keys::TERRAFORM_APPLIED, json!(false))
        .with(keys::STATUS, json!(PipelineStatus::Running.as_str()))
        .with(keys::ERROR_MESSAGE, json!(null))
        .with(keys::DECISION_HISTORY, json!([]))
        .with(keys::TOOLS_MISSING, json!([]))
        .with(keys::COMMANDS_RUN, json!(0))
        .with(keys::DRY_RUN, json!(config.dry_run))
}

// Typed views over state fields. Absent or malformed fields read as empty;
// nodes treat missing data as "nothing discovered yet".

pub fn file_inventory(state: &State) -> FileInventory {
    state.get_as(keys::FILES).unwrap_or_default()
}

pub fn validation_findings(state: &State) -> BTreeMap<String, Vec<Finding>> {
    state.get_as(keys::VALIDATION_RESULTS).unwrap_or_default()
}

pub fn collected_errors(state: &State) -> BTreeMap<String, Vec<String>> {
    state.get_as(keys::COLLECTED_ERRORS).unwrap_or_default()
}

pub fn fix_attempts(state: &State) -> BTreeMap<String, FixAttempt> {
    state.get_as(keys::FIX_ATTEMPTS).unwrap_or_default()
}

pub fn release_records(state: &State) -> BTreeMap<String, ReleaseRecord> {
    state.get_as(keys::RELEASE_RESULTS).unwrap_or_default()
}

pub fn status(state: &State) -> String {
    state
        .get(keys::STATUS)
        .and_then(|v| v.as_str())
        .unwrap_or(PipelineStatus::Running.as_str())
        .to_string()
}

pub fn total_errors(collected: &BTreeMap<String, Vec<String>>) -> usize {
    collected.values().map(Vec::len).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_roundtrip() {
        for category in Category::ALL {
            let json = serde_json::to_value(category).unwrap();
            assert_eq!(json, json!(category.as_str()));
            let back: Category = serde_json::from_value(json).unwrap();
            assert_eq!(back, category);
        }
    }

    #[test]
    fn test_finding_kind_defaults_to_lint() {
        let finding: Finding = serde_json::from_value(json!({
            "file": "main.tf",
            "message": "bad block",
            "severity": "error"
        }))
        .unwrap();
        assert_eq!(finding.kind, FindingKind::Lint);
        assert_eq!(finding.line, None);
    }

    #[test]
    fn test_fix_attempt_exhaustion() {
        let mut attempt = FixAttempt::new(3);
        assert!(!attempt.exhausted());
        attempt.attempts = 3;
        assert!(attempt.exhausted());
    }

    #[test]
    fn test_initial_state_shape() {
        let config = PipelineConfig::default();
        let state = initial_state(&["infra".to_string()], &config);

        assert_eq!(state.get(keys::STATUS), Some(&json!("running")));
        assert_eq!(state.get(keys::TERRAFORM_APPLIED), Some(&json!(false)));

        let attempts = fix_attempts(&state);
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts["terraform"].attempts, 0);
        assert_eq!(attempts["terraform"].limit, config.max_fix_attempts);
    }

    #[test]
    fn test_typed_views_default_on_missing() {
        let state = State::new();
        assert_eq!(file_inventory(&state), FileInventory::default());
        assert!(collected_errors(&state).is_empty());
        assert_eq!(status(&state), "running");
    }

    #[test]
    fn test_total_errors() {
        let mut collected = BTreeMap::new();
        collected.insert("terraform".to_string(), vec!["a".to_string()]);
        collected.insert("docker".to_string(), vec![]);
        collected.insert("helm".to_string(), vec!["b".to_string(), "c".to_string()]);
        assert_eq!(total_errors(&collected), 3);
    }
}
