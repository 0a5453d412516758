use anyhow::Result;
use std::path::Path;
use tracing::info;

use bridgeboot::cli::ConfigCommands;
use bridgeboot::config::BridgebootConfig;

pub fn run(
    command: &ConfigCommands,
    config: &BridgebootConfig,
    source: Option<&Path>,
) -> Result<()> {
    match command {
        ConfigCommands::Validate { path } => validate(path),
        ConfigCommands::Example => example(),
        ConfigCommands::Show => show(config, source),
    }
}

fn validate(path: &str) -> Result<()> {
    info!("Validating config file: {}", path);

    let config = BridgebootConfig::from_file(path)?;

    println!("✓ Configuration file is valid: {}", path);
    println!("\nSummary:");
    println!("  - Cache directory: {}", config.cache_dir().display());
    println!("  - Lock stale after: {}", config.cache.lock_stale_after);
    println!("  - JVM launcher: {}", config.build.java);
    println!(
        "  - Build timeout: {}",
        config.build.timeout.as_deref().unwrap_or("none")
    );

    Ok(())
}

fn example() -> Result<()> {
    println!("{}", BridgebootConfig::example()?);
    Ok(())
}

fn show(config: &BridgebootConfig, source: Option<&Path>) -> Result<()> {
    match source {
        Some(path) => println!("# Loaded from {}\n", path.display()),
        None => println!("# No configuration file found, using defaults\n"),
    }
    println!("{}", toml::to_string_pretty(config)?);

    Ok(())
}
