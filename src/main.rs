//! exthost - extension lifecycle manager
//!
//! Main entry point for the exthost CLI.

mod cli;
mod cmd_extensions;
mod cmd_mcp;

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use exthost_config::{Config, ConfigLoader, ConfigValidator};
use exthost_core::ExtensionHost;

use crate::cli::{Cli, Commands};
use crate::cmd_extensions::handle_extensions_command;
use crate::cmd_mcp::handle_mcp_command;

/// Initialize tracing with console and file output.
///
/// Log files are written to the configured log directory with daily rotation.
fn init_tracing(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let console = fmt::layer().with_target(true).with_writer(std::io::stderr);

    if !config.logging.file {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .init();
        return Ok(());
    }

    let log_dir = config.log_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("exthost")
        .filename_suffix("log")
        .max_log_files(30)
        .build(&log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Flushes pending log lines on exit.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(())
}

fn load_config(path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).to_string());
    let config = ConfigLoader::load_or_default(&expanded)?;

    let validation = ConfigValidator::validate(&config);
    if !validation.is_valid() {
        let errors: Vec<_> = validation
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect();
        return Err(format!("invalid configuration: {}", errors.join("; ")).into());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_tracing(&config)?;

    for warning in ConfigValidator::validate(&config).warnings {
        warn!("Config {}: {}", warning.path, warning.message);
    }

    match cli.command {
        None | Some(Commands::Run) => run_host(&config).await,
        Some(Commands::Extensions { action }) => handle_extensions_command(action, &config).await,
        Some(Commands::Mcp { action }) => handle_mcp_command(action, &config).await,
    }
}

/// Keep every installed extension live until interrupted.
async fn run_host(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting exthost v{}", env!("CARGO_PKG_VERSION"));
    info!("State directory: {}", config.state_dir().display());

    let mut host = ExtensionHost::open(config).await?;
    for report in host.restore().await {
        info!(
            "{} generation {}: {}/{} servers ready",
            report.extension,
            report.generation,
            report.ready_count(),
            report.total()
        );
    }
    host.start_update_poller();

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    host.shutdown().await;
    Ok(())
}
