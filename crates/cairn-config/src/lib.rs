//! Cairn Configuration System
//!
//! Provides layered configuration for the `cairn` test runner:
//! - Project configuration (cairn.toml)
//! - Global user configuration (~/.cairn/config.toml)
//! - Environment overrides
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config (~/.cairn/config.toml)
//! 3. Project config (./cairn.toml, searched upwards)
//! 4. Environment variables (CAIRN_*)
//! 5. CLI flags (applied by the caller)
//!
//! # Example
//!
//! ```no_run
//! use cairn_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! println!("timeout: {}ms", config.timeout());
//! ```

pub mod global;
pub mod loader;
pub mod project;

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Timeout applied to every test unless something more specific overrides it.
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Snapshot directory used when neither config nor flags name one.
pub const DEFAULT_SNAPSHOT_ROOT: &str = "test/snapshot";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in {file}: {error}")]
    Parse {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

pub use global::GlobalConfig;
pub use loader::{Config, ConfigLoader, PROJECT_FILE};
pub use project::{ProjectConfig, RunSection};

/// Read and deserialize a TOML file
pub(crate) fn read_toml<T: DeserializeOwned>(path: &Path) -> ConfigResult<T> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
        _ => ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })?;
    parse_toml(&content, path)
}

/// Deserialize TOML text; `path` only labels errors
pub(crate) fn parse_toml<T: DeserializeOwned>(content: &str, path: &Path) -> ConfigResult<T> {
    toml::from_str(content).map_err(|error| ConfigError::Parse {
        file: path.to_path_buf(),
        error,
    })
}
