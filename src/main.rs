//! circlet - run CircleCI-style pipelines locally
//!
//! CLI entry point that dispatches to subcommands.

use circlet::cli::{commands, Cli, Commands};
use circlet::config::ConfigManager;
use circlet::error::{CircletError, CircletResult};
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Exit code for pipeline document and configuration errors
const DOCUMENT_ERROR_EXIT_CODE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            if e.is_document_error() {
                ExitCode::from(DOCUMENT_ERROR_EXIT_CODE)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run() -> CircletResult<i32> {
    let cli = Cli::parse();

    // Load configuration
    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    // Find local config unless --no-local is set
    let local_config_path = if cli.no_local {
        None
    } else {
        let cwd =
            std::env::current_dir().map_err(|e| CircletError::io("getting current directory", e))?;
        ConfigManager::find_local_config(&cwd)
    };

    let config = config_manager
        .load_merged(local_config_path.as_deref())
        .await?;

    init_logging(cli.verbose, &config.general.log_format);
    if let Some(ref path) = local_config_path {
        debug!("Found local config: {}", path.display());
    }

    // Dispatch to command
    match cli.command {
        Commands::Run(args) => commands::run(args, &config).await,
        Commands::Validate(args) => commands::validate(args, &config).await.map(|()| 0),
        Commands::Plan(args) => commands::plan(args, &config).await.map(|()| 0),
        Commands::Keys(args) => commands::keys(args, &config).await.map(|()| 0),
        Commands::Cache(args) => commands::cache(args, &config).await.map(|()| 0),
        Commands::Config(args) => commands::config(args, &config, &config_manager)
            .await
            .map(|()| 0),
    }
}

/// 0 = warn, 1 = info, 2+ = debug; `log_format = "json"` switches formatter
fn init_logging(verbose: u8, log_format: &str) {
    let filter = match verbose {
        0 => EnvFilter::new("circlet=warn"),
        1 => EnvFilter::new("circlet=info"),
        _ => EnvFilter::new("circlet=debug"),
    };

    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .with_writer(std::io::stderr)
            .init();
    }
}
