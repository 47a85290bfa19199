pub mod config;
pub mod demo;
pub mod host;
pub mod logging;
pub mod reload;

pub use config::{ConfigLoadError, LoggingConfig, ProjectPaths, ScriptingConfig, SkhostConfig};
pub use demo::{DemoParser, TriggerHeader, default_catalog, parse_event_line};
pub use host::{InProcessHost, ScriptHost};
pub use logging::init_logging;
pub use reload::{forward_reload_requests, setup_reload_signal_handler};
