pub mod paths;
pub mod scripting_config;
pub mod skhost_config;

pub use paths::ProjectPaths;
pub use scripting_config::{LoggingConfig, ScriptingConfig};
pub use skhost_config::{ConfigLoadError, SkhostConfig};
