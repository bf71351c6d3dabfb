mod cli;

use std::io::IsTerminal;
use std::process;

use anyhow::{Context, Result};
use chapsplit::config::AppConfig;
use chapsplit::logging::{self, LOG_RETENTION_DAYS, LoggingOptions};
use clap::Parser;
use colored::*;
use tracing::{error, info, warn};

use crate::cli::{Args, CommandExecutor, Commands, ExtractOptions, NormalizeOptions};

#[tokio::main]
async fn main() {
    // A missing .env is normal
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("Application error: {e:#}");
        eprintln!("{} {e:#}", "Error:".red().bold());
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    if let Some(cli::Commands::Config { show, reset }) = &args.command {
        return CommandExecutor::config_command(args.config.as_deref(), *show, *reset);
    }

    let mut config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply_overrides(&mut config);
    config.validate()?;

    let _log_guard = logging::init_logging(&LoggingOptions {
        verbose: args.verbose,
        quiet: args.quiet,
        filter: config.log_filter.clone(),
        log_dir: config.log_dir.clone(),
        ansi: std::io::stderr().is_terminal(),
    })?;

    if let Some(dir) = &config.log_dir {
        match logging::cleanup_old_logs(dir, LOG_RETENTION_DAYS).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Removed old log files"),
            Err(e) => warn!(error = %e, "Failed to clean up old log files"),
        }
    }

    info!(
        output_dir = %config.output_dir.display(),
        workers = config.worker_count(),
        "Starting chapsplit"
    );

    let executor = CommandExecutor::new(config, args.quiet);
    match args.command {
        Some(Commands::Extract {
            url,
            all,
            yes,
            artist,
            album,
            target_lufs,
        }) => {
            executor
                .extract(ExtractOptions {
                    url,
                    all,
                    yes,
                    artist,
                    album,
                    target: target_lufs,
                })
                .await
        }
        Some(Commands::Normalize {
            dir,
            target_lufs,
            measure_only,
            yes,
        }) => {
            executor
                .normalize(NormalizeOptions {
                    dir,
                    target: target_lufs,
                    measure_only,
                    yes,
                })
                .await
        }
        Some(Commands::Config { .. }) => Ok(()),
        None => executor.interactive().await,
    }
}
