//! Script file discovery
//!
//! Walks a script directory depth-first. Within each directory the files come
//! first, then each subdirectory with everything below it, both in name order.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ErrorReporter, ScriptError};

/// Extension of script files
pub const SCRIPT_EXTENSION: &str = "sk";

/// File name prefix marking a script as disabled
pub const DISABLED_PREFIX: &str = "-";

/// Result of walking a script directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovered {
    /// Enabled scripts in load order
    pub enabled: Vec<PathBuf>,
    /// Scripts carrying the disabled prefix
    pub disabled: Vec<PathBuf>,
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}

fn is_script(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(SCRIPT_EXTENSION)
}

fn is_hidden(path: &Path) -> bool {
    file_name(path).is_some_and(|name| name.starts_with('.'))
}

/// Whether the file name carries the disabled prefix
pub fn is_disabled(path: &Path) -> bool {
    file_name(path).is_some_and(|name| name.starts_with(DISABLED_PREFIX))
}

/// The disabled-marker path for a script (`dir/a.sk` -> `dir/-a.sk`)
pub fn disabled_path(path: &Path) -> PathBuf {
    match file_name(path) {
        Some(name) if !name.starts_with(DISABLED_PREFIX) => {
            path.with_file_name(format!("{DISABLED_PREFIX}{name}"))
        }
        _ => path.to_path_buf(),
    }
}

/// The enabled path for a disabled marker (`dir/-a.sk` -> `dir/a.sk`)
pub fn enabled_path(path: &Path) -> PathBuf {
    match file_name(path).and_then(|name| name.strip_prefix(DISABLED_PREFIX)) {
        Some(stripped) => path.with_file_name(stripped),
        None => path.to_path_buf(),
    }
}

/// Walk `root` and collect its script files
///
/// `root` may also be a single script file. Entries that cannot be resolved
/// (broken symlinks, permission errors) are reported and skipped.
pub fn discover(root: &Path, reporter: &dyn ErrorReporter) -> Discovered {
    let mut found = Discovered::default();

    match fs::metadata(root) {
        Ok(meta) if meta.is_dir() => walk(root, &mut found, reporter),
        Ok(_) => classify(root.to_path_buf(), &mut found),
        Err(source) => reporter.report(&ScriptError::Source {
            path: root.to_path_buf(),
            source,
        }),
    }

    debug!(
        target: "scripting",
        "Discovered {} enabled and {} disabled script(s) under {}",
        found.enabled.len(),
        found.disabled.len(),
        root.display()
    );
    found
}

fn classify(path: PathBuf, found: &mut Discovered) {
    if is_hidden(&path) || !is_script(&path) {
        return;
    }
    if is_disabled(&path) {
        found.disabled.push(path);
    } else {
        found.enabled.push(path);
    }
}

fn walk(dir: &Path, found: &mut Discovered, reporter: &dyn ErrorReporter) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(source) => {
            reporter.report(&ScriptError::Source {
                path: dir.to_path_buf(),
                source,
            });
            return;
        }
    };

    let mut files = Vec::new();
    let mut dirs = Vec::new();

    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(source) => {
                reporter.report(&ScriptError::Source {
                    path: dir.to_path_buf(),
                    source,
                });
                continue;
            }
        };

        if is_hidden(&path) {
            continue;
        }

        // Follows symlinks, so a dangling link fails here
        match fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => dirs.push(path),
            Ok(_) => files.push(path),
            Err(source) => reporter.report(&ScriptError::Source { path, source }),
        }
    }

    files.sort();
    dirs.sort();

    for file in files {
        classify(file, found);
    }
    for sub in dirs {
        walk(&sub, found, reporter);
    }
}
