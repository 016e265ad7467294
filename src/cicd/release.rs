// SPDX-License-Identifier: MIT

//! Release nodes: build and publish the validated artifacts, in order.
//! A failed target is recorded and the chain continues; the terraform node,
//! last in the chain, folds every record into the terminal status. Releases
//! are never retried.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::graph::{Node, NodeError, State, StateUpdate};

use super::discovery::{chart_dirs, parent_dirs};
use super::state::{
    file_inventory, keys, release_records, Category, PipelineStatus, ReleaseOutcome,
    ReleaseRecord,
};
use super::tools::CommandRunner;

/// A release collaborator failed; carried as data into `release_results` and
/// the terminal status, never retried.
#[derive(Debug, Error)]
#[error("release step failed: {cause}")]
pub struct ReleaseError {
    pub cause: String,
}

impl ReleaseError {
    fn new(cause: impl Into<String>) -> Self {
        Self { cause: cause.into() }
    }
}

fn record_update(category: Category, record: &ReleaseRecord, commands: u64) -> StateUpdate {
    StateUpdate::of(keys::RELEASE_RESULTS, json!({ category.as_str(): record }))
        .with(keys::COMMANDS_RUN, json!(commands))
}

/// `docker build` per dockerfile, tagged `<dir-name>:<timestamp>`.
pub struct ReleaseDocker {
    runner: Arc<dyn CommandRunner>,
}

impl ReleaseDocker {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn build_images(
        &self,
        files: &[String],
        commands: &mut u64,
    ) -> Result<Vec<String>, ReleaseError> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let mut images = Vec::new();

        for dockerfile in files {
            let dir = Path::new(dockerfile)
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_else(|| "app".to_string());
            let tag = format!("{}:{}", name, stamp);

            log::info!("building {}", tag);
            *commands += 1;
            let output = self
                .runner
                .run("docker", &["build", "-t", tag.as_str(), "."], Some(dir))
                .await
                .map_err(|e| ReleaseError::new(e.to_string()))?;
            if !output.success {
                return Err(ReleaseError::new(format!(
                    "docker build {} failed: {}",
                    tag,
                    output.detail()
                )));
            }
            images.push(tag);
        }

        Ok(images)
    }
}

#[async_trait]
impl Node for ReleaseDocker {
    async fn run(&self, state: &State) -> Result<StateUpdate, NodeError> {
        let files = file_inventory(state).docker;
        if files.is_empty() {
            log::info!("no docker files to release");
            return Ok(record_update(Category::Docker, &ReleaseRecord::skipped(), 0));
        }

        let mut commands = 0;
        match self.build_images(&files, &mut commands).await {
            Ok(images) => {
                log::info!("built {} docker image(s)", images.len());
                Ok(
                    record_update(Category::Docker, &ReleaseRecord::success(images.clone()), commands)
                        .with(keys::DOCKER_IMAGES_BUILT, json!(images)),
                )
            }
            Err(e) => {
                log::error!("docker release failed: {}", e);
                Ok(record_update(Category::Docker, &ReleaseRecord::failed(e.cause), commands))
            }
        }
    }
}

/// `helm package` per chart root, into the configured dist directory.
pub struct ReleaseHelm {
    runner: Arc<dyn CommandRunner>,
    dist_dir: String,
}

impl ReleaseHelm {
    pub fn new(runner: Arc<dyn CommandRunner>, dist_dir: impl Into<String>) -> Self {
        Self {
            runner,
            dist_dir: dist_dir.into(),
        }
    }

    async fn package_charts(
        &self,
        files: &[String],
        commands: &mut u64,
    ) -> Result<Vec<String>, ReleaseError> {
        let mut charts = Vec::new();
        for dir in chart_dirs(files) {
            let name = Path::new(&dir)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| dir.clone());

            log::info!("packaging chart {}", name);
            *commands += 1;
            let output = self
                .runner
                .run(
                    "helm",
                    &["package", dir.as_str(), "--destination", self.dist_dir.as_str()],
                    None,
                )
                .await
                .map_err(|e| ReleaseError::new(e.to_string()))?;
            if !output.success {
                return Err(ReleaseError::new(format!(
                    "helm package {} failed: {}",
                    name,
                    output.detail()
                )));
            }
            charts.push(name);
        }
        Ok(charts)
    }
}

#[async_trait]
impl Node for ReleaseHelm {
    async fn run(&self, state: &State) -> Result<StateUpdate, NodeError> {
        let files = file_inventory(state).helm;
        if files.is_empty() {
            log::info!("no helm charts to release");
            return Ok(record_update(Category::Helm, &ReleaseRecord::skipped(), 0));
        }

        let mut commands = 0;
        match self.package_charts(&files, &mut commands).await {
            Ok(charts) => {
                log::info!("released {} helm chart(s)", charts.len());
                Ok(
                    record_update(Category::Helm, &ReleaseRecord::success(charts.clone()), commands)
                        .with(keys::HELM_CHARTS_RELEASED, json!(charts)),
                )
            }
            Err(e) => {
                log::error!("helm release failed: {}", e);
                Ok(record_update(Category::Helm, &ReleaseRecord::failed(e.cause), commands))
            }
        }
    }
}

/// `terraform plan` + `apply` per tf directory, then the terminal status from
/// the accumulated release records.
pub struct ReleaseTerraform {
    runner: Arc<dyn CommandRunner>,
}

impl ReleaseTerraform {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn apply_dirs(
        &self,
        files: &[String],
        commands: &mut u64,
    ) -> Result<Vec<String>, ReleaseError> {
        let mut applied = Vec::new();
        for dir in parent_dirs(files) {
            log::info!("planning terraform in {}", dir);
            *commands += 1;
            let plan = self
                .runner
                .run("terraform", &["plan", "-out=tfplan"], Some(Path::new(&dir)))
                .await
                .map_err(|e| ReleaseError::new(e.to_string()))?;
            if !plan.success {
                return Err(ReleaseError::new(format!(
                    "terraform plan in {} failed: {}",
                    dir,
                    plan.detail()
                )));
            }

            log::info!("applying terraform in {}", dir);
            *commands += 1;
            let apply = self
                .runner
                .run(
                    "terraform",
                    &["apply", "-auto-approve", "tfplan"],
                    Some(Path::new(&dir)),
                )
                .await
                .map_err(|e| ReleaseError::new(e.to_string()))?;
            if !apply.success {
                return Err(ReleaseError::new(format!(
                    "terraform apply in {} failed: {}",
                    dir,
                    apply.detail()
                )));
            }
            applied.push(dir);
        }
        Ok(applied)
    }
}

/// Terminal status once every target has a record: any failure fails the run.
fn final_status(records: &BTreeMap<String, ReleaseRecord>) -> (PipelineStatus, Option<String>) {
    let failed: Vec<String> = records
        .iter()
        .filter(|(_, r)| r.outcome == ReleaseOutcome::Failed)
        .map(|(target, record)| {
            format!(
                "{}: {}",
                target,
                record.error.as_deref().unwrap_or("unknown error")
            )
        })
        .collect();

    if failed.is_empty() {
        (PipelineStatus::Success, None)
    } else {
        (PipelineStatus::Failed, Some(failed.join("; ")))
    }
}

#[async_trait]
impl Node for ReleaseTerraform {
    async fn run(&self, state: &State) -> Result<StateUpdate, NodeError> {
        let files = file_inventory(state).terraform;
        let mut commands = 0;

        let (record, applied) = if files.is_empty() {
            log::info!("no terraform files to release");
            (ReleaseRecord::skipped(), false)
        } else {
            match self.apply_dirs(&files, &mut commands).await {
                Ok(dirs) => (ReleaseRecord::success(dirs), true),
                Err(e) => {
                    log::error!("terraform release failed: {}", e);
                    (ReleaseRecord::failed(e.cause), false)
                }
            }
        };

        let mut records = release_records(state);
        records.insert(Category::Terraform.as_str().to_string(), record.clone());
        let (status, error_message) = final_status(&records);
        log::info!("release finished with status: {}", status);

        let mut update = record_update(Category::Terraform, &record, commands)
            .with(keys::TERRAFORM_APPLIED, json!(applied))
            .with(keys::STATUS, json!(status.as_str()));
        if let Some(message) = error_message {
            update.set(keys::ERROR_MESSAGE, json!(message));
        }
        Ok(update)
    }
}
