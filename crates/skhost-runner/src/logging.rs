use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ProjectPaths;

const MAX_LOG_SIZE: u64 = 1024 * 1024; // 1MB

/// Initialize logging for a component.
///
/// `RUST_LOG` overrides `default_level`. With `to_file` set, logs are also
/// appended to `<data dir>/logs/<component>.log`.
///
/// Returns a guard that must be kept alive for the duration of the program.
pub fn init_logging(
    component_name: &str,
    default_level: &str,
    to_file: bool,
) -> io::Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if !to_file {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        return Ok(None);
    }

    let log_dir = log_directory()?;
    fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join(format!("{}.log", component_name));
    truncate_if_needed(&log_path)?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let (non_blocking_file, guard) = tracing_appender::non_blocking(BufWriter::new(file));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(io::stdout).with_ansi(true))
        .with(
            fmt::layer()
                .with_writer(non_blocking_file)
                .with_ansi(false)
                .with_target(true),
        )
        .init();

    tracing::info!(target: "runner", "Logging to file: {}", log_path.display());
    Ok(Some(guard))
}

fn log_directory() -> io::Result<PathBuf> {
    let paths = ProjectPaths::new("skhost")
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Failed to find home directory"))?;
    Ok(paths.data_dir().join("logs"))
}

/// Empty the log file once it grows past MAX_LOG_SIZE
fn truncate_if_needed(log_path: &Path) -> io::Result<()> {
    match fs::metadata(log_path) {
        Ok(metadata) if metadata.len() > MAX_LOG_SIZE => fs::File::create(log_path).map(drop),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
