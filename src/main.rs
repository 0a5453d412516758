mod commands;

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing::debug;

use bridgeboot::cli::{Cli, Commands};
use bridgeboot::cli_utils::bridgeboot_prefix;
use bridgeboot::config_discovery::load_config_with_discovery;
use bridgeboot::error::BootstrapError;
use bridgeboot::logging;

fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize structured logging
    logging::init(cli.log_level.as_deref());

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} error: {:#}", bridgeboot_prefix(), e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let (config, source) = load_config_with_discovery(cli.config.as_deref())
        .map_err(|e| BootstrapError::InvalidConfiguration(format!("{:#}", e)))?;

    if let Some(path) = &source {
        debug!("{} Using config: {}", bridgeboot_prefix(), path.display());
    }

    // Dispatch to appropriate command handler
    match cli.command {
        Commands::Bootstrap(args) => commands::bootstrap::run(args, &config),
        Commands::Cache(args) => commands::cache::run(&args, &config),
        Commands::Config(args) => commands::config::run(&args.command, &config, source.as_deref()),
    }
}

/// 2/3/4 for the bootstrap error taxonomy, 1 for anything else
fn exit_code(error: &anyhow::Error) -> u8 {
    error
        .downcast_ref::<BootstrapError>()
        .map(BootstrapError::exit_code)
        .unwrap_or(1)
}
