use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::paths::ProjectPaths;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptingConfig {
    /// Whether scripts are loaded at all
    pub enabled: bool,

    /// Directory containing scripts (default: <data dir>/scripts)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_dir: Option<PathBuf>,

    /// Construction workers; 0 parses on the calling task
    pub worker_threads: usize,

    /// Reload every script when the process receives SIGUSR2
    pub reload_on_signal: bool,
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            script_dir: None,
            worker_threads: 0,
            reload_on_signal: true,
        }
    }
}

impl ScriptingConfig {
    /// The configured script directory, or the default one
    pub fn script_dir(&self) -> PathBuf {
        self.script_dir.clone().unwrap_or_else(|| {
            ProjectPaths::new("skhost")
                .map(|p| p.data_dir().join("scripts"))
                .unwrap_or_else(|| PathBuf::from("scripts"))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also write logs to <data dir>/logs/skhost.log
    pub file: bool,
}
