// SPDX-License-Identifier: MIT

//! Artifact discovery: walk the caller's root paths and classify files into
//! terraform / docker / helm inventories.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

use crate::graph::{Node, NodeError, State, StateUpdate};

use super::state::{keys, FileInventory};

pub fn is_terraform_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("tf") | Some("tfvars")
    )
}

pub fn is_docker_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.to_lowercase();
    name.starts_with("dockerfile") || name.contains("docker-compose")
}

pub fn is_helm_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.to_lowercase();
    if matches!(name.as_str(), "chart.yaml" | "values.yaml" | "requirements.yaml") {
        return true;
    }
    path.to_string_lossy().to_lowercase().contains("/templates/")
}

/// Unique parent directories of a file list ("." for bare file names).
pub fn parent_dirs(files: &[String]) -> BTreeSet<String> {
    files
        .iter()
        .map(|f| {
            let parent = Path::new(f).parent().map(|p| p.to_string_lossy().into_owned());
            match parent {
                Some(p) if !p.is_empty() => p,
                _ => ".".to_string(),
            }
        })
        .collect()
}

/// Chart root for each helm file: the nearest ancestor directory holding a
/// `Chart.yaml`. Files with no such ancestor are skipped.
pub fn chart_dirs(files: &[String]) -> BTreeSet<String> {
    let mut dirs = BTreeSet::new();
    for file in files {
        let mut current = Path::new(file).parent();
        while let Some(dir) = current {
            if dir.join("Chart.yaml").is_file() {
                dirs.insert(dir.to_string_lossy().into_owned());
                break;
            }
            current = dir.parent();
        }
    }
    dirs
}

/// Discovery node: fills the [`keys::FILES`] inventory from the root paths.
pub struct Discover {
    excluded_dirs: Vec<String>,
}

impl Discover {
    pub fn new(excluded_dirs: Vec<String>) -> Self {
        Self { excluded_dirs }
    }

    fn keep_entry(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        let Some(name) = entry.file_name().to_str() else {
            return false;
        };
        !name.starts_with('.') && !self.excluded_dirs.iter().any(|d| d == name)
    }
}

#[async_trait]
impl Node for Discover {
    async fn run(&self, state: &State) -> Result<StateUpdate, NodeError> {
        let roots: Vec<String> = state.get_as(keys::ROOTS).unwrap_or_default();
        let mut inventory = FileInventory::default();

        for root in &roots {
            if !Path::new(root).exists() {
                log::warn!("path does not exist: {}", root);
                continue;
            }

            for entry in WalkDir::new(root)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| self.keep_entry(e))
            {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        log::warn!("skipping unreadable entry under {}: {}", root, e);
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }

                let path = entry.path();
                let path_str = path.to_string_lossy().into_owned();
                if is_terraform_file(path) {
                    inventory.terraform.push(path_str);
                } else if is_docker_file(path) {
                    inventory.docker.push(path_str);
                } else if is_helm_file(path) {
                    inventory.helm.push(path_str);
                }
            }
        }

        log::info!(
            "discovered {} terraform, {} docker, {} helm file(s)",
            inventory.terraform.len(),
            inventory.docker.len(),
            inventory.helm.len()
        );

        Ok(StateUpdate::of(keys::FILES, json!(inventory)))
    }
}
