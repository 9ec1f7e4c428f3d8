//! Finds `cairn.toml`, merges it with the global file and applies `CAIRN_*` overrides

use crate::global::GlobalConfig;
use crate::project::ProjectConfig;
use crate::{ConfigError, ConfigResult, DEFAULT_SNAPSHOT_ROOT, DEFAULT_TIMEOUT_MS};
use std::env;
use std::path::{Path, PathBuf};

/// Name of the project configuration file
pub const PROJECT_FILE: &str = "cairn.toml";

/// Builds a [`Config`]. Lowest to highest priority: global file, project file,
/// environment. Command-line flags are layered on top by the caller.
pub struct ConfigLoader {
    /// Resolved lazily from the home directory unless set explicitly
    global_config_path: Option<PathBuf>,
}

/// Everything the loader found, with accessors that apply precedence
#[derive(Debug, Clone)]
pub struct Config {
    pub project: ProjectConfig,
    pub global: GlobalConfig,

    /// Project root directory (where cairn.toml was found)
    pub project_root: Option<PathBuf>,

    /// NO_COLOR / CAIRN_NO_COLOR was set
    pub env_no_color: bool,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Use an explicit global config file instead of ~/.cairn/config.toml
    pub fn with_global_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_config_path = Some(path.into());
        self
    }

    /// Use the nearest `cairn.toml` at or above `start_dir`; without one only
    /// global and environment settings apply
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = self.find_project(start_dir)?;
        let global_config = self.load_global_config().unwrap_or_default();
        let project_config = self.apply_env_overrides(project_config)?;

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
            env_no_color: no_color_from_env(),
        })
    }

    /// Use an explicit project file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = ProjectConfig::load_from_file(config_path)?;
        let global_config = self.load_global_config().unwrap_or_default();
        let project_config = self.apply_env_overrides(project_config)?;

        let project_root = config_path.parent().map(|p| p.to_path_buf());

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
            env_no_color: no_color_from_env(),
        })
    }

    fn find_project(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, ProjectConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_FILE);

            if config_path.exists() {
                let project_config = ProjectConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, ProjectConfig::default())),
            }
        }
    }

    /// Load global configuration from ~/.cairn/config.toml
    fn load_global_config(&mut self) -> ConfigResult<GlobalConfig> {
        let path = match &self.global_config_path {
            Some(path) => path.clone(),
            None => {
                let path = GlobalConfig::global_config_path()?;
                self.global_config_path = Some(path.clone());
                path
            }
        };

        if !path.exists() {
            return Ok(GlobalConfig::default());
        }

        GlobalConfig::load_from_file(&path)
    }

    /// `CAIRN_TIMEOUT=<ms>` and `CAIRN_SNAPSHOT_ROOT=<dir>` win over the project file
    fn apply_env_overrides(&self, mut config: ProjectConfig) -> ConfigResult<ProjectConfig> {
        if let Ok(timeout) = env::var("CAIRN_TIMEOUT") {
            let ms = timeout
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: "CAIRN_TIMEOUT".to_string(),
                    reason: format!("'{}' is not a positive number of milliseconds", timeout),
                })?;
            config.run_mut().timeout = Some(ms);
        }

        if let Ok(root) = env::var("CAIRN_SNAPSHOT_ROOT") {
            if !root.is_empty() {
                config.run_mut().snapshot_root = Some(PathBuf::from(root));
            }
        }

        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn no_color_from_env() -> bool {
    env::var_os("CAIRN_NO_COLOR").is_some() || env::var_os("NO_COLOR").is_some()
}

impl Config {
    /// Effective default timeout (project > global > built-in)
    pub fn timeout(&self) -> u64 {
        self.project
            .timeout()
            .or_else(|| self.global.default_timeout())
            .unwrap_or(DEFAULT_TIMEOUT_MS)
    }

    /// Suite paths from cairn.toml, resolved against the project root
    pub fn paths(&self) -> Vec<PathBuf> {
        let Some(run) = &self.project.run else {
            return Vec::new();
        };
        run.paths.iter().map(|p| self.resolve(p)).collect()
    }

    /// Effective snapshot directory
    pub fn snapshot_root(&self) -> PathBuf {
        match self.project.run.as_ref().and_then(|r| r.snapshot_root.as_ref()) {
            Some(root) => self.resolve(root),
            None => PathBuf::from(DEFAULT_SNAPSHOT_ROOT),
        }
    }

    pub fn watch(&self) -> bool {
        self.run_flag(|r| r.watch)
    }

    pub fn snapshot(&self) -> bool {
        self.run_flag(|r| r.snapshot)
    }

    pub fn interactive(&self) -> bool {
        self.run_flag(|r| r.interactive)
    }

    /// Whether colored output is disabled by environment or global config
    pub fn no_color(&self) -> bool {
        self.env_no_color || self.global.no_color()
    }

    /// Directory holding the `cairn.toml` in use
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }

    fn run_flag(&self, get: impl Fn(&crate::RunSection) -> Option<bool>) -> bool {
        self.project.run.as_ref().and_then(get).unwrap_or(false)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.project_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn write_project(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join(PROJECT_FILE);
        fs::write(&path, content).unwrap();
        path
    }

    fn loader(dir: &TempDir) -> ConfigLoader {
        ConfigLoader::new().with_global_path(dir.path().join("no-global.toml"))
    }

    #[test]
    #[serial]
    fn test_find_config_in_parent() {
        let tmp = TempDir::new().unwrap();
        write_project(tmp.path(), "[run]\ntimeout = 300\n");

        let sub_dir = tmp.path().join("subdir");
        fs::create_dir(&sub_dir).unwrap();

        let config = loader(&tmp).load_from_directory(&sub_dir).unwrap();
        assert_eq!(config.timeout(), 300);
        assert_eq!(config.project_root(), Some(tmp.path()));
    }

    #[test]
    #[serial]
    fn test_env_override_timeout() {
        let tmp = TempDir::new().unwrap();
        write_project(tmp.path(), "[run]\ntimeout = 300\n");

        env::set_var("CAIRN_TIMEOUT", "4500");
        let result = loader(&tmp).load_from_directory(tmp.path());
        env::remove_var("CAIRN_TIMEOUT");

        assert_eq!(result.unwrap().timeout(), 4500);
    }

    #[test]
    #[serial]
    fn test_env_override_rejects_garbage_timeout() {
        let tmp = TempDir::new().unwrap();

        env::set_var("CAIRN_TIMEOUT", "soon");
        let result = loader(&tmp).load_from_directory(tmp.path());
        env::remove_var("CAIRN_TIMEOUT");

        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    #[serial]
    fn test_paths_resolved_against_root() {
        let tmp = TempDir::new().unwrap();
        write_project(tmp.path(), "[run]\npaths = [\"suites\", \"/abs/suite.toml\"]\n");

        let config = loader(&tmp).load_from_directory(tmp.path()).unwrap();
        assert_eq!(
            config.paths(),
            vec![tmp.path().join("suites"), PathBuf::from("/abs/suite.toml")]
        );
    }
}
