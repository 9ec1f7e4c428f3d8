//! `cairn.toml`: per-project run settings

use crate::{parse_toml, read_toml, ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Project configuration from cairn.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Run settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<RunSection>,
}

/// The `[run]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct RunSection {
    /// Suite files or directories to run when none are given on the command line
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<PathBuf>,

    /// Default per-test timeout in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Re-run suites when their files change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch: Option<bool>,

    /// Record snapshots
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<bool>,

    /// Directory holding snapshot files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_root: Option<PathBuf>,

    /// Allow tests to prompt on the terminal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interactive: Option<bool>,
}

impl ProjectConfig {
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let config: Self = read_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse project configuration from a string; `path` is used for error reporting only
    pub fn parse(content: &str, path: &Path) -> ConfigResult<Self> {
        let config: Self = parse_toml(content, path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(run) = &self.run {
            if run.timeout == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: "run.timeout".to_string(),
                    reason: "timeout must be greater than zero".to_string(),
                });
            }
            if run.paths.iter().any(|p| p.as_os_str().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    field: "run.paths".to_string(),
                    reason: "paths cannot be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Get the run section, creating an empty one when missing
    pub fn run_mut(&mut self) -> &mut RunSection {
        self.run.get_or_insert_with(RunSection::default)
    }

    /// Configured default timeout, if any
    pub fn timeout(&self) -> Option<u64> {
        self.run.as_ref().and_then(|r| r.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_section() {
        let config = ProjectConfig::parse(
            r#"
[run]
paths = ["test/suites"]
timeout = 500
snapshot_root = "test/snap"
"#,
            Path::new("cairn.toml"),
        )
        .unwrap();

        let run = config.run.unwrap();
        assert_eq!(run.paths, vec![PathBuf::from("test/suites")]);
        assert_eq!(run.timeout, Some(500));
        assert_eq!(run.snapshot_root, Some(PathBuf::from("test/snap")));
        assert_eq!(run.interactive, None);
    }

    #[test]
    fn test_rejects_unknown_field() {
        let result = ProjectConfig::parse("[run]\nparallel = true\n", Path::new("cairn.toml"));
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let result = ProjectConfig::parse("[run]\ntimeout = 0\n", Path::new("cairn.toml"));
        match result {
            Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "run.timeout"),
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config = ProjectConfig::parse("", Path::new("cairn.toml")).unwrap();
        assert_eq!(config, ProjectConfig::default());
        assert_eq!(config.timeout(), None);
    }
}
