use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use skhost_events::EventEnvelope;
use skhost_runner::{
    ConfigLoadError, DemoParser, ScriptHost, SkhostConfig, default_catalog,
    forward_reload_requests, init_logging, parse_event_line,
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enables debug logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Config file to use instead of the default location
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory to load scripts from (overrides config file)
    #[arg(short, long)]
    script_dir: Option<PathBuf>,

    /// Number of construction workers (overrides config file)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Write an example config file and exit
    #[arg(long)]
    init_config: bool,
}

fn create_example_config(path: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let config_path = match path {
        Some(path) => path,
        None => SkhostConfig::config_path()?,
    };

    // Never overwrite an existing config file
    if config_path.exists() {
        return Err(format!(
            "Config file already exists at {}. Edit it manually or delete it to create a new one.",
            config_path.display()
        )
        .into());
    }

    SkhostConfig::example().save_to(&config_path)?;
    eprintln!("Config file created at: {}", config_path.display());
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<SkhostConfig, ConfigLoadError> {
    match path {
        Some(path) => SkhostConfig::load_from(path),
        None => match SkhostConfig::load() {
            Err(ConfigLoadError::NotFound(_)) => Ok(SkhostConfig::default()),
            other => other,
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    if cli.init_config {
        return create_example_config(cli.config);
    }

    let mut config = load_config(cli.config.as_ref())
        .map_err(|err| format!("Failed to load config: {}", err))?;
    if let Some(dir) = cli.script_dir {
        config.scripting.script_dir = Some(dir);
    }
    if let Some(workers) = cli.workers {
        config.scripting.worker_threads = workers;
    }

    let level = if cli.debug > 0 { "debug" } else { "info" };
    let _log_guard = init_logging("skhost", level, config.logging.file)?;

    if !config.scripting.enabled {
        info!("Scripting is disabled in the config, nothing to do");
        return Ok(());
    }

    info!("Starting skhost...");
    let mut host = ScriptHost::new(
        &config.scripting,
        Arc::new(default_catalog()?),
        Arc::new(DemoParser),
    );

    let summary = host.load().await?;
    info!(
        "Loaded {} script(s) with {} structure(s) from {}",
        summary.files,
        summary.structures,
        host.script_dir().display()
    );

    if config.scripting.reload_on_signal {
        forward_reload_requests(host.sender());
    }

    // Each console line is raised as a host event, e.g. `join player=ada`
    let events = host.sender();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(event) = parse_event_line(&line) {
                        if events.send(EventEnvelope::host_event(event)).is_err() {
                            break;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read from stdin: {}", e);
                    break;
                }
            }
        }
    });

    host.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await;

    Ok(())
}
