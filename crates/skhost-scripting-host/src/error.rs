use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, warn};

/// Activation phase a structure callback ran in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    PreLoad,
    Load,
    PostLoad,
    Unload,
    PostUnload,
    /// Running a trigger's statements in response to an event
    Execute,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::PreLoad => "preLoad",
            Phase::Load => "load",
            Phase::PostLoad => "postLoad",
            Phase::Unload => "unload",
            Phase::PostUnload => "postUnload",
            Phase::Execute => "execute",
        };
        f.write_str(name)
    }
}

/// Failures raised while discovering, parsing, loading or running scripts
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// A file could not be read or resolved
    #[error("cannot read {}: {source}", .path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file or a single unit of it failed structural parsing
    #[error("{}{}: {message}", .path.display(), line_suffix(.line))]
    Parse {
        path: PathBuf,
        line: Option<usize>,
        message: String,
    },

    /// A structure callback failed or rejected the structure
    #[error("{phase} failed for '{structure}' in {}: {message}", .script.display())]
    Phase {
        phase: Phase,
        script: PathBuf,
        structure: String,
        message: String,
    },

    /// A task submitted to the worker pool failed
    #[error("worker task failed: {message}")]
    Pool { message: String },

    /// Programming error, reported to the caller instead of being absorbed
    #[error("invariant violated: {message}")]
    Invariant { message: String },
}

impl ScriptError {
    pub fn pool(error: impl fmt::Display) -> Self {
        Self::Pool {
            message: format!("{error:#}"),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }

    pub fn parse(path: impl Into<PathBuf>, line: Option<usize>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    /// The script file the failure belongs to, when there is one
    pub fn script(&self) -> Option<&Path> {
        match self {
            Self::Source { path, .. } | Self::Parse { path, .. } => Some(path),
            Self::Phase { script, .. } => Some(script),
            Self::Pool { .. } | Self::Invariant { .. } => None,
        }
    }
}

fn line_suffix(line: &Option<usize>) -> String {
    line.map(|l| format!(":{l}")).unwrap_or_default()
}

/// Render a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// Receives every failure the runtime catches
///
/// Implementations must not panic.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &ScriptError);
}

/// Reporter that writes failures to the `scripting` log target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, error: &ScriptError) {
        match error {
            ScriptError::Source { .. } | ScriptError::Parse { .. } => {
                warn!(target: "scripting", "{}", error);
            }
            ScriptError::Phase { .. } | ScriptError::Pool { .. } | ScriptError::Invariant { .. } => {
                error!(target: "scripting", "{}", error);
            }
        }
    }
}
