// SPDX-License-Identifier: MIT

//! Pipeline configuration, loadable from a YAML file.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Per-category fix attempt ceiling.
    pub max_fix_attempts: u32,
    /// Absolute executor round ceiling.
    pub max_rounds: u32,
    /// Timeout for each external command.
    pub command_timeout_secs: u64,
    /// Destination directory for packaged helm charts.
    pub dist_dir: String,
    /// Directory names skipped during discovery (hidden dirs always are).
    pub excluded_dirs: Vec<String>,
    /// Validate only; the release label routes to a skip node.
    pub dry_run: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_fix_attempts: 3,
            max_rounds: 1000,
            command_timeout_secs: 300,
            dist_dir: "dist".to_string(),
            excluded_dirs: vec!["node_modules".to_string(), ".terraform".to_string()],
            dry_run: false,
        }
    }
}

impl PipelineConfig {
    /// Load a config from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_yaml(&content)
    }

    /// Parse a config from a YAML string.
    pub fn parse_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_fix_attempts, 3);
        assert_eq!(config.command_timeout_secs, 300);
        assert!(!config.dry_run);
    }

    #[test]
    fn test_parse_partial_yaml_keeps_defaults() {
        let config = PipelineConfig::parse_yaml("max_fix_attempts: 5\ndry_run: true\n").unwrap();
        assert_eq!(config.max_fix_attempts, 5);
        assert!(config.dry_run);
        assert_eq!(config.dist_dir, "dist");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = PipelineConfig::parse_yaml("max_fix_atempts: 5\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_mapping_uses_defaults() {
        let config = PipelineConfig::parse_yaml("{}").unwrap();
        assert_eq!(config.max_rounds, 1000);
    }
}
