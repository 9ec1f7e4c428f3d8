//! User-wide defaults in `~/.cairn/config.toml`

use crate::{read_toml, ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global user configuration from ~/.cairn/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// The `[defaults]` table
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<DefaultsConfig>,
}

/// Fallbacks used when a project does not set them
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DefaultsConfig {
    /// Default per-test timeout in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Disable colored output everywhere
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_color: Option<bool>,
}

impl GlobalConfig {
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let config: Self = read_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(defaults) = &self.defaults {
            if defaults.timeout == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: "defaults.timeout".to_string(),
                    reason: "timeout must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Path of the global config file (~/.cairn/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".cairn").join("config.toml"))
    }

    pub fn default_timeout(&self) -> Option<u64> {
        self.defaults.as_ref().and_then(|d| d.timeout)
    }

    pub fn no_color(&self) -> bool {
        self.defaults
            .as_ref()
            .and_then(|d| d.no_color)
            .unwrap_or(false)
    }
}
