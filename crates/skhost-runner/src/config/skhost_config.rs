use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::paths::ProjectPaths;
use crate::config::scripting_config::{LoggingConfig, ScriptingConfig};

const CONFIG_FILE: &str = "skhost.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("config file not found at {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("IO error on config file: {0}")]
    Io(#[from] io::Error),
    #[error("cannot determine the config directory (no home directory)")]
    NoConfigDir,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkhostConfig {
    #[serde(default)]
    pub scripting: ScriptingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SkhostConfig {
    /// Default location: `<config dir>/skhost.toml`
    pub fn config_path() -> Result<PathBuf, ConfigLoadError> {
        ProjectPaths::new("skhost")
            .map(|paths| paths.config_dir().join(CONFIG_FILE))
            .ok_or(ConfigLoadError::NoConfigDir)
    }

    /// Config written by `--init-config`: defaults with two construction workers
    pub fn example() -> Self {
        Self {
            scripting: ScriptingConfig {
                worker_threads: 2,
                ..ScriptingConfig::default()
            },
            ..Self::default()
        }
    }

    /// Load from the default location
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigLoadError> {
        if !path.exists() {
            return Err(ConfigLoadError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config = content.parse()?;
        info!(target: "runner", "Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigLoadError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, toml::to_string_pretty(self)?)?;
        info!(target: "runner", "Saved config to {}", path.display());
        Ok(())
    }
}

impl std::str::FromStr for SkhostConfig {
    type Err = ConfigLoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}
