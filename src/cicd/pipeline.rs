// SPDX-License-Identifier: MIT

//! Pipeline graph assembly: wires discovery, the validation fan-out, error
//! aggregation, the fix/retry loop, and the release chain into one graph.

use std::sync::Arc;
use thiserror::Error;

use crate::graph::{
    BuildError, Executor, Graph, GraphBuilder, GraphValidationError, Router, RunError, State,
    END, START,
};

use super::config::PipelineConfig;
use super::decision::{
    decide_next_action, CollectErrors, Decide, FailWorkflow, PrepareRelease, SkipRelease,
};
use super::discovery::Discover;
use super::fixers::{FixDocker, FixHelm, FixTerraform};
use super::release::{ReleaseDocker, ReleaseHelm, ReleaseTerraform};
use super::state::{initial_state, reducers};
use super::tools::CommandRunner;
use super::validators::{ValidateDocker, ValidateHelm, ValidateTerraform};

/// Node ids, fixed so tests and logs can refer to them.
pub mod nodes {
    pub const DISCOVER: &str = "discover";
    pub const VALIDATE_TERRAFORM: &str = "validate_terraform";
    pub const VALIDATE_DOCKER: &str = "validate_docker";
    pub const VALIDATE_HELM: &str = "validate_helm";
    pub const COLLECT_ERRORS: &str = "collect_errors";
    pub const DECIDE: &str = "decide";
    pub const FIX_TERRAFORM: &str = "fix_terraform";
    pub const FIX_DOCKER: &str = "fix_docker";
    pub const FIX_HELM: &str = "fix_helm";
    pub const PREPARE_RELEASE: &str = "prepare_release";
    pub const SKIP_RELEASE: &str = "skip_release";
    pub const RELEASE_DOCKER: &str = "release_docker";
    pub const RELEASE_HELM: &str = "release_helm";
    pub const RELEASE_TERRAFORM: &str = "release_terraform";
    pub const FAIL: &str = "fail";
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Validation(#[from] GraphValidationError),

    #[error(transparent)]
    Run(#[from] Box<RunError>),
}

/// Assemble the pipeline graph.
///
/// Shape: discovery fans out to the three validators; their join aggregates
/// errors; the decision routes to the release chain, the fix chain (which
/// loops back to the FULL validation fan-out), or the fail node. Under
/// `dry_run` the release label routes to a skip node instead — the label set
/// itself never changes.
pub fn build_pipeline(
    runner: Arc<dyn CommandRunner>,
    config: &PipelineConfig,
) -> Result<Graph, PipelineError> {
    let mut builder = GraphBuilder::new();

    builder.add_node(
        nodes::DISCOVER,
        Arc::new(Discover::new(config.excluded_dirs.clone())),
    )?;
    builder.add_node(
        nodes::VALIDATE_TERRAFORM,
        Arc::new(ValidateTerraform::new(runner.clone())),
    )?;
    builder.add_node(
        nodes::VALIDATE_DOCKER,
        Arc::new(ValidateDocker::new(runner.clone())),
    )?;
    builder.add_node(
        nodes::VALIDATE_HELM,
        Arc::new(ValidateHelm::new(runner.clone())),
    )?;
    builder.add_node(nodes::COLLECT_ERRORS, Arc::new(CollectErrors))?;
    builder.add_node(nodes::DECIDE, Arc::new(Decide))?;
    builder.add_node(
        nodes::FIX_TERRAFORM,
        Arc::new(FixTerraform::new(runner.clone())),
    )?;
    builder.add_node(nodes::FIX_DOCKER, Arc::new(FixDocker))?;
    builder.add_node(nodes::FIX_HELM, Arc::new(FixHelm))?;
    builder.add_node(nodes::FAIL, Arc::new(FailWorkflow))?;

    let release_target = if config.dry_run {
        builder.add_node(nodes::SKIP_RELEASE, Arc::new(SkipRelease))?;
        nodes::SKIP_RELEASE
    } else {
        builder.add_node(nodes::PREPARE_RELEASE, Arc::new(PrepareRelease))?;
        builder.add_node(
            nodes::RELEASE_DOCKER,
            Arc::new(ReleaseDocker::new(runner.clone())),
        )?;
        builder.add_node(
            nodes::RELEASE_HELM,
            Arc::new(ReleaseHelm::new(runner.clone(), config.dist_dir.clone())),
        )?;
        builder.add_node(
            nodes::RELEASE_TERRAFORM,
            Arc::new(ReleaseTerraform::new(runner.clone())),
        )?;
        nodes::PREPARE_RELEASE
    };

    builder.add_edge(START, nodes::DISCOVER)?;

    // Parallel validation fan-out.
    builder.add_edge(nodes::DISCOVER, nodes::VALIDATE_TERRAFORM)?;
    builder.add_edge(nodes::DISCOVER, nodes::VALIDATE_DOCKER)?;
    builder.add_edge(nodes::DISCOVER, nodes::VALIDATE_HELM)?;

    // Join: collect waits for all three validators.
    builder.add_edge(nodes::VALIDATE_TERRAFORM, nodes::COLLECT_ERRORS)?;
    builder.add_edge(nodes::VALIDATE_DOCKER, nodes::COLLECT_ERRORS)?;
    builder.add_edge(nodes::VALIDATE_HELM, nodes::COLLECT_ERRORS)?;

    builder.add_edge(nodes::COLLECT_ERRORS, nodes::DECIDE)?;

    let router: Router = Arc::new(|state: &State| decide_next_action(state).as_str().to_string());
    builder.add_conditional_edge(
        nodes::DECIDE,
        router,
        [
            ("release", release_target),
            ("fix", nodes::FIX_TERRAFORM),
            ("fail", nodes::FAIL),
        ],
    )?;

    // Fix chain, then loop back to the full validation fan-out: every retry
    // re-validates every category.
    builder.add_edge(nodes::FIX_TERRAFORM, nodes::FIX_DOCKER)?;
    builder.add_edge(nodes::FIX_DOCKER, nodes::FIX_HELM)?;
    builder.add_edge(nodes::FIX_HELM, nodes::VALIDATE_TERRAFORM)?;
    builder.add_edge(nodes::FIX_HELM, nodes::VALIDATE_DOCKER)?;
    builder.add_edge(nodes::FIX_HELM, nodes::VALIDATE_HELM)?;

    if config.dry_run {
        builder.add_edge(nodes::SKIP_RELEASE, END)?;
    } else {
        builder.add_edge(nodes::PREPARE_RELEASE, nodes::RELEASE_DOCKER)?;
        builder.add_edge(nodes::RELEASE_DOCKER, nodes::RELEASE_HELM)?;
        builder.add_edge(nodes::RELEASE_HELM, nodes::RELEASE_TERRAFORM)?;
        builder.add_edge(nodes::RELEASE_TERRAFORM, END)?;
    }

    builder.add_edge(nodes::FAIL, END)?;

    Ok(builder.build()?)
}

/// Build and execute the pipeline over the given root paths.
pub async fn run_pipeline(
    roots: &[String],
    config: &PipelineConfig,
    runner: Arc<dyn CommandRunner>,
) -> Result<State, PipelineError> {
    let graph = build_pipeline(runner, config)?;
    let executor = Executor::new(graph, reducers()).with_max_rounds(config.max_rounds);
    let state = executor
        .run(initial_state(roots, config))
        .await
        .map_err(Box::new)?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cicd::tools::{CommandError, CommandOutput};
    use async_trait::async_trait;
    use std::path::Path;

    struct OkRunner;

    #[async_trait]
    impl CommandRunner for OkRunner {
        async fn run(
            &self,
            _program: &str,
            _args: &[&str],
            _cwd: Option<&Path>,
        ) -> Result<CommandOutput, CommandError> {
            Ok(CommandOutput::ok(""))
        }
    }

    #[test]
    fn test_pipeline_graph_builds() {
        let config = PipelineConfig::default();
        let graph = build_pipeline(Arc::new(OkRunner), &config).unwrap();
        assert_eq!(graph.node_count(), 14);
        assert!(graph.contains(nodes::PREPARE_RELEASE));
        assert!(!graph.contains(nodes::SKIP_RELEASE));
    }

    #[test]
    fn test_dry_run_graph_swaps_release_chain() {
        let config = PipelineConfig {
            dry_run: true,
            ..PipelineConfig::default()
        };
        let graph = build_pipeline(Arc::new(OkRunner), &config).unwrap();
        assert!(graph.contains(nodes::SKIP_RELEASE));
        assert!(!graph.contains(nodes::RELEASE_DOCKER));
    }

    #[test]
    fn test_collect_join_has_three_predecessors() {
        let config = PipelineConfig::default();
        let graph = build_pipeline(Arc::new(OkRunner), &config).unwrap();
        assert_eq!(graph.predecessors(nodes::COLLECT_ERRORS).len(), 3);
    }
}
