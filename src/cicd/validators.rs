// SPDX-License-Identifier: MIT

//! Validator nodes: run the lint tools for each technology track and turn
//! their results into findings. Lint failures and missing tools are data in
//! state, never node errors — an empty finding list means the track passed.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use crate::graph::{Node, NodeError, State, StateUpdate};

use super::discovery::{chart_dirs, parent_dirs};
use super::state::{file_inventory, keys, Category, Finding};
use super::tools::CommandRunner;

/// Outcome of one tool invocation against one target.
struct ToolCheck {
    finding: Option<Finding>,
    missing_tool: Option<String>,
}

async fn check_tool(
    runner: &Arc<dyn CommandRunner>,
    label: &str,
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    target: &str,
) -> ToolCheck {
    match runner.run(program, args, cwd).await {
        Ok(output) if output.success => ToolCheck {
            finding: None,
            missing_tool: None,
        },
        Ok(output) => ToolCheck {
            finding: Some(Finding::error(
                target,
                format!("[{}] {}", label, output.detail()),
            )),
            missing_tool: None,
        },
        Err(e) if e.is_unavailable() => {
            log::warn!("{}: {}", target, e);
            ToolCheck {
                finding: Some(Finding::tool_unavailable(target, e.to_string())),
                missing_tool: Some(program.to_string()),
            }
        }
        Err(e) => ToolCheck {
            finding: Some(Finding::error(target, format!("[{}] {}", label, e))),
            missing_tool: None,
        },
    }
}

/// Shared tail: package one category's findings into a state update.
fn report(
    category: Category,
    findings: Vec<Finding>,
    missing: BTreeSet<String>,
    commands: u64,
) -> StateUpdate {
    if findings.is_empty() {
        log::info!("{} validation passed", category);
    } else {
        log::info!("{} validation produced {} finding(s)", category, findings.len());
    }

    let mut update = StateUpdate::of(
        keys::VALIDATION_RESULTS,
        json!({ category.as_str(): findings }),
    )
    .with(keys::COMMANDS_RUN, json!(commands));
    if !missing.is_empty() {
        update.set(keys::TOOLS_MISSING, json!(missing));
    }
    update
}

/// `terraform validate` + `tflint` over each directory holding .tf files.
pub struct ValidateTerraform {
    runner: Arc<dyn CommandRunner>,
}

impl ValidateTerraform {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Node for ValidateTerraform {
    async fn run(&self, state: &State) -> Result<StateUpdate, NodeError> {
        let files = file_inventory(state).terraform;
        if files.is_empty() {
            log::info!("no terraform files to validate");
            return Ok(report(Category::Terraform, Vec::new(), BTreeSet::new(), 0));
        }

        let mut findings = Vec::new();
        let mut missing = BTreeSet::new();
        let mut commands = 0;

        for dir in parent_dirs(&files) {
            log::info!("validating terraform in {}", dir);
            for (label, program, args) in [
                ("terraform validate", "terraform", &["validate"][..]),
                ("tflint", "tflint", &[][..]),
            ] {
                commands += 1;
                let check =
                    check_tool(&self.runner, label, program, args, Some(Path::new(&dir)), &dir)
                        .await;
                findings.extend(check.finding);
                missing.extend(check.missing_tool);
            }
        }

        Ok(report(Category::Terraform, findings, missing, commands))
    }
}

/// `hadolint` over each dockerfile.
pub struct ValidateDocker {
    runner: Arc<dyn CommandRunner>,
}

impl ValidateDocker {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Node for ValidateDocker {
    async fn run(&self, state: &State) -> Result<StateUpdate, NodeError> {
        let files = file_inventory(state).docker;
        if files.is_empty() {
            log::info!("no docker files to validate");
            return Ok(report(Category::Docker, Vec::new(), BTreeSet::new(), 0));
        }

        let mut findings = Vec::new();
        let mut missing = BTreeSet::new();
        let mut commands = 0;

        for file in &files {
            log::info!("validating docker file {}", file);
            commands += 1;
            let check =
                check_tool(&self.runner, "hadolint", "hadolint", &[file.as_str()], None, file)
                    .await;
            findings.extend(check.finding);
            missing.extend(check.missing_tool);
        }

        Ok(report(Category::Docker, findings, missing, commands))
    }
}

/// `helm lint` + `helm template` over each chart root.
pub struct ValidateHelm {
    runner: Arc<dyn CommandRunner>,
}

impl ValidateHelm {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Node for ValidateHelm {
    async fn run(&self, state: &State) -> Result<StateUpdate, NodeError> {
        let files = file_inventory(state).helm;
        if files.is_empty() {
            log::info!("no helm files to validate");
            return Ok(report(Category::Helm, Vec::new(), BTreeSet::new(), 0));
        }

        let mut findings = Vec::new();
        let mut missing = BTreeSet::new();
        let mut commands = 0;

        for dir in chart_dirs(&files) {
            log::info!("validating helm chart {}", dir);
            for subcommand in ["lint", "template"] {
                commands += 1;
                let label = format!("helm {}", subcommand);
                let check = check_tool(
                    &self.runner,
                    &label,
                    "helm",
                    &[subcommand, dir.as_str()],
                    None,
                    &dir,
                )
                .await;
                findings.extend(check.finding);
                missing.extend(check.missing_tool);
            }
        }

        Ok(report(Category::Helm, findings, missing, commands))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cicd::state::{validation_findings, FindingKind};
    use crate::cicd::tools::{CommandError, CommandOutput};
    use crate::graph::ReducerRegistry;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    /// Scripted runner: named tools fail or go missing, everything else passes.
    struct ScriptedRunner {
        failing: BTreeSet<&'static str>,
        missing: BTreeSet<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new(failing: &[&'static str], missing: &[&'static str]) -> Self {
            Self {
                failing: failing.iter().copied().collect(),
                missing: missing.iter().copied().collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(
            &self,
            program: &str,
            args: &[&str],
            _cwd: Option<&Path>,
        ) -> Result<CommandOutput, CommandError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{} {}", program, args.join(" ")));
            if self.missing.contains(program) {
                return Err(CommandError::Unavailable {
                    tool: program.to_string(),
                    reason: "not found".to_string(),
                });
            }
            if self.failing.contains(program) {
                return Ok(CommandOutput::failed("lint failed"));
            }
            Ok(CommandOutput::ok(""))
        }
    }

    fn state_with_files(terraform: &[&str], docker: &[&str], helm: &[&str]) -> State {
        State::new().with(
            keys::FILES,
            json!({
                "terraform": terraform,
                "docker": docker,
                "helm": helm,
            }),
        )
    }

    fn merged(update: StateUpdate) -> State {
        let mut state = State::new();
        state.apply(&crate::cicd::state::reducers(), update);
        state
    }

    #[tokio::test]
    async fn test_empty_inventory_yields_empty_findings() {
        let runner = Arc::new(ScriptedRunner::new(&[], &[]));
        let node = ValidateTerraform::new(runner.clone());
        let update = node.run(&state_with_files(&[], &[], &[])).await.unwrap();

        let state = merged(update);
        let findings = validation_findings(&state);
        assert_eq!(findings["terraform"], Vec::new());
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_passing_tools_produce_no_findings() {
        let runner = Arc::new(ScriptedRunner::new(&[], &[]));
        let node = ValidateTerraform::new(runner.clone());
        let update = node
            .run(&state_with_files(&["infra/main.tf"], &[], &[]))
            .await
            .unwrap();

        let state = merged(update);
        assert!(validation_findings(&state)["terraform"].is_empty());
        // terraform validate + tflint over one directory.
        assert_eq!(runner.calls.lock().unwrap().len(), 2);
        assert_eq!(state.get(keys::COMMANDS_RUN), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_failing_tool_produces_finding() {
        let runner = Arc::new(ScriptedRunner::new(&["tflint"], &[]));
        let node = ValidateTerraform::new(runner);
        let update = node
            .run(&state_with_files(&["infra/main.tf"], &[], &[]))
            .await
            .unwrap();

        let state = merged(update);
        let findings = &validation_findings(&state)["terraform"];
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("[tflint]"));
        assert_eq!(findings[0].kind, FindingKind::Lint);
    }

    #[tokio::test]
    async fn test_missing_tool_becomes_unavailable_finding() {
        let runner = Arc::new(ScriptedRunner::new(&[], &["hadolint"]));
        let node = ValidateDocker::new(runner);
        let update = node
            .run(&state_with_files(&[], &["app/Dockerfile"], &[]))
            .await
            .unwrap();

        let state = merged(update);
        let findings = &validation_findings(&state)["docker"];
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::ToolUnavailable);
        assert_eq!(state.get(keys::TOOLS_MISSING), Some(&json!(["hadolint"])));
    }

    #[tokio::test]
    async fn test_helm_runs_lint_and_template_per_chart() {
        let dir = tempfile::tempdir().unwrap();
        let chart = dir.path().join("chart");
        std::fs::create_dir_all(&chart).unwrap();
        std::fs::write(chart.join("Chart.yaml"), "name: demo\n").unwrap();
        let chart_yaml = chart.join("Chart.yaml").to_string_lossy().into_owned();

        let runner = Arc::new(ScriptedRunner::new(&[], &[]));
        let node = ValidateHelm::new(runner.clone());
        let update = node
            .run(&state_with_files(&[], &[], &[&chart_yaml]))
            .await
            .unwrap();

        let state = merged(update);
        assert!(validation_findings(&state)["helm"].is_empty());
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("helm lint"));
        assert!(calls[1].starts_with("helm template"));
    }
}
