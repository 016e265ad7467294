// SPDX-License-Identifier: MIT

//! Fixer nodes: mechanical rewrites for each category's common defects.
//! Each fixer that actually attempts something increments its category's
//! retry counter — returned as an update, folded in by the merge step.

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::graph::{Node, NodeError, State, StateUpdate};

use super::discovery::{chart_dirs, parent_dirs};
use super::state::{
    collected_errors, file_inventory, fix_attempts, keys, Category, FixAttempt,
};
use super::tools::CommandRunner;

/// Base images pinned to known-good tags when left untagged or `:latest`.
static BASE_IMAGE_PINS: Lazy<BTreeMap<&'static str, &'static str>> = Lazy::new(|| {
    BTreeMap::from([
        ("python", "python:3.11-slim"),
        ("node", "node:20-alpine"),
        ("ubuntu", "ubuntu:22.04"),
        ("alpine", "alpine:3.18"),
    ])
});

/// Whether this category should attempt a fix this cycle, and its counter.
/// Returns `None` when there is nothing to do or the ceiling is reached.
fn fix_ticket(state: &State, category: Category) -> Option<FixAttempt> {
    let collected = collected_errors(state);
    let has_errors = collected
        .get(category.as_str())
        .map(|errs| !errs.is_empty())
        .unwrap_or(false);
    if !has_errors {
        log::debug!("nothing to fix for {}", category);
        return None;
    }

    let attempt = fix_attempts(state)
        .remove(category.as_str())
        .unwrap_or_else(|| FixAttempt::new(3));
    if attempt.exhausted() {
        log::warn!("max fix attempts reached for {}", category);
        return None;
    }

    log::info!(
        "attempting {} fixes ({}/{})",
        category,
        attempt.attempts + 1,
        attempt.limit
    );
    Some(attempt)
}

/// Shared tail: bump the counter and report what was touched.
fn fix_report(category: Category, attempt: FixAttempt, fixed: Vec<String>) -> StateUpdate {
    let bumped = FixAttempt {
        attempts: attempt.attempts + 1,
        limit: attempt.limit,
        last_attempt: Some(Utc::now().to_rfc3339()),
    };
    log::info!("fixed {} {} file(s)", fixed.len(), category);

    StateUpdate::of(keys::FIX_ATTEMPTS, json!({ category.as_str(): bumped }))
        .with(keys::FILES_FIXED, json!(fixed))
        .with(keys::FIX_APPLIED, json!(true))
}

/// Prepend a `required_providers` block when provider blocks exist without one.
pub fn ensure_required_providers(content: &str) -> Option<String> {
    if content.contains("required_providers") || !content.contains("provider \"") {
        return None;
    }
    Some(format!(
        "terraform {{\n  required_providers {{\n    # providers are auto-detected\n  }}\n}}\n\n{}",
        content
    ))
}

/// Dockerfile rewrites: pin floating base images, ensure WORKDIR, ensure a
/// non-root USER before the entry instruction.
pub fn rewrite_dockerfile(content: &str) -> Option<String> {
    let lines: Vec<&str> = content.lines().collect();
    let has_workdir = lines.iter().any(|l| l.trim_start().starts_with("WORKDIR"));
    let has_user = lines.iter().any(|l| l.trim_start().starts_with("USER"));

    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 2);
    let mut changed = false;
    let mut workdir_inserted = false;
    let mut user_inserted = false;

    for line in &lines {
        let trimmed = line.trim_start();

        if !user_inserted
            && !has_user
            && (trimmed.starts_with("CMD") || trimmed.starts_with("ENTRYPOINT"))
        {
            out.push("USER 1000".to_string());
            user_inserted = true;
            changed = true;
        }

        if trimmed.starts_with("FROM") {
            let mut parts: Vec<String> = trimmed.split_whitespace().map(String::from).collect();
            if parts.len() >= 2 {
                let image = parts[1].clone();
                let base = image.strip_suffix(":latest").unwrap_or(&image);
                if !base.contains(':') {
                    if let Some(pin) = BASE_IMAGE_PINS.get(base) {
                        parts[1] = pin.to_string();
                        out.push(parts.join(" "));
                        changed = true;
                        if !has_workdir && !workdir_inserted {
                            out.push("WORKDIR /app".to_string());
                            workdir_inserted = true;
                        }
                        continue;
                    }
                }
            }
            out.push(line.to_string());
            if !has_workdir && !workdir_inserted {
                out.push("WORKDIR /app".to_string());
                workdir_inserted = true;
                changed = true;
            }
            continue;
        }

        out.push(line.to_string());
    }

    changed.then(|| {
        let mut text = out.join("\n");
        if content.ends_with('\n') {
            text.push('\n');
        }
        text
    })
}

/// Ensure Chart.yaml carries the fields `helm lint` requires.
pub fn fix_chart_yaml(content: &str, chart_name: &str) -> Option<String> {
    let mut text = content.to_string();
    let mut changed = false;

    if !text.contains("apiVersion:") {
        text = format!("apiVersion: v2\n{}", text);
        changed = true;
    }
    if !text.contains("name:") {
        text = format!("{}\nname: {}\n", text.trim_end(), chart_name);
        changed = true;
    }
    if !text.contains("version:") {
        text = format!("{}\nversion: 0.1.0\n", text.trim_end());
        changed = true;
    }

    changed.then_some(text)
}

/// `terraform fmt` plus a `required_providers` backfill over each tf dir.
pub struct FixTerraform {
    runner: Arc<dyn CommandRunner>,
}

impl FixTerraform {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Node for FixTerraform {
    async fn run(&self, state: &State) -> Result<StateUpdate, NodeError> {
        let Some(attempt) = fix_ticket(state, Category::Terraform) else {
            return Ok(StateUpdate::new());
        };
        let files = file_inventory(state).terraform;
        if files.is_empty() {
            return Ok(StateUpdate::new());
        }

        let mut commands = 0;
        for dir in parent_dirs(&files) {
            commands += 1;
            if let Err(e) = self
                .runner
                .run("terraform", &["fmt", "-recursive"], Some(Path::new(&dir)))
                .await
            {
                log::warn!("terraform fmt in {} failed: {}", dir, e);
            }
        }

        let mut fixed = Vec::new();
        for file in &files {
            if !file.ends_with(".tf") {
                continue;
            }
            match tokio::fs::read_to_string(file).await {
                Ok(content) => {
                    if let Some(updated) = ensure_required_providers(&content) {
                        tokio::fs::write(file, updated).await?;
                    }
                    fixed.push(file.clone());
                }
                Err(e) => log::warn!("could not read {}: {}", file, e),
            }
        }

        Ok(fix_report(Category::Terraform, attempt, fixed)
            .with(keys::COMMANDS_RUN, json!(commands)))
    }
}

/// Text-level dockerfile repairs; no external tools involved.
pub struct FixDocker;

#[async_trait]
impl Node for FixDocker {
    async fn run(&self, state: &State) -> Result<StateUpdate, NodeError> {
        let Some(attempt) = fix_ticket(state, Category::Docker) else {
            return Ok(StateUpdate::new());
        };
        let files = file_inventory(state).docker;
        if files.is_empty() {
            return Ok(StateUpdate::new());
        }

        let mut fixed = Vec::new();
        for file in &files {
            match tokio::fs::read_to_string(file).await {
                Ok(content) => {
                    if let Some(updated) = rewrite_dockerfile(&content) {
                        tokio::fs::write(file, updated).await?;
                        log::info!("rewrote {}", file);
                    }
                    fixed.push(file.clone());
                }
                Err(e) => log::warn!("could not read {}: {}", file, e),
            }
        }

        Ok(fix_report(Category::Docker, attempt, fixed))
    }
}

/// Chart.yaml required-field backfill.
pub struct FixHelm;

#[async_trait]
impl Node for FixHelm {
    async fn run(&self, state: &State) -> Result<StateUpdate, NodeError> {
        let Some(attempt) = fix_ticket(state, Category::Helm) else {
            return Ok(StateUpdate::new());
        };
        let files = file_inventory(state).helm;
        if files.is_empty() {
            return Ok(StateUpdate::new());
        }

        let mut fixed = Vec::new();
        for dir in chart_dirs(&files) {
            let chart_yaml = Path::new(&dir).join("Chart.yaml");
            let chart_name = Path::new(&dir)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "chart".to_string());

            match tokio::fs::read_to_string(&chart_yaml).await {
                Ok(content) => {
                    if let Some(updated) = fix_chart_yaml(&content, &chart_name) {
                        tokio::fs::write(&chart_yaml, updated).await?;
                        log::info!("fixed {}", chart_yaml.display());
                    }
                    fixed.push(chart_yaml.to_string_lossy().into_owned());
                }
                Err(e) => log::warn!("could not read {}: {}", chart_yaml.display(), e),
            }
        }

        Ok(fix_report(Category::Helm, attempt, fixed))
    }
}
