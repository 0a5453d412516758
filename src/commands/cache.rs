/// `bridgeboot cache` command implementation
///
/// Manages cached compiler bridges (list, stats, verify, clean).
use anyhow::{Context, Result};

use bridgeboot::cache_key::CompilerCacheKey;
use bridgeboot::cli::{CacheArgs, CacheCommands};
use bridgeboot::cli_utils::{bridgeboot_prefix, format_size};
use bridgeboot::config::{expand_home, BridgebootConfig};
use bridgeboot::store::ArtifactStore;

pub fn run(args: &CacheArgs, config: &BridgebootConfig) -> Result<()> {
    let cache_dir = args
        .cache_dir
        .as_deref()
        .map(expand_home)
        .unwrap_or_else(|| config.cache_dir());
    let store = ArtifactStore::new(&cache_dir, config.lock_options()?)?;

    match &args.command {
        CacheCommands::List { verbose } => list(&store, *verbose),
        CacheCommands::Stats => stats(&store),
        CacheCommands::Verify => verify(&store),
        CacheCommands::Clean { key, all } => clean(&store, key.as_deref(), *all),
    }
}

/// List all cached bridges
fn list(store: &ArtifactStore, verbose: bool) -> Result<()> {
    let records = store.list().context("Failed to list cache entries")?;

    if records.is_empty() {
        println!("No cached bridges.");
        return Ok(());
    }

    println!("Cached bridges ({} entries):", records.len());
    println!();

    for record in records {
        println!("  {}", record.cache_key);
        println!("    Created: {}", record.created_at.format("%Y-%m-%d %H:%M:%S"));

        if verbose {
            println!("    Builder: {}", record.builder);
            println!("    Build time: {:.2}s", record.duration_ms as f64 / 1000.0);
            println!("    Size: {}", format_size(record.size_bytes));
            println!("    SHA-256: {}", record.sha256);
        }

        println!();
    }

    Ok(())
}

/// Show cache statistics
fn stats(store: &ArtifactStore) -> Result<()> {
    let stats = store.stats().context("Failed to get cache statistics")?;

    println!("Bridge Cache Statistics");
    println!();
    println!("Location: {}", stats.root.display());
    println!("Total entries: {}", stats.entries);
    println!("Total size: {}", format_size(stats.total_bytes));

    Ok(())
}

/// Check every entry; fails when any is corrupt
fn verify(store: &ArtifactStore) -> Result<()> {
    let report = store.verify_all().context("Failed to verify cache")?;

    for key in &report.valid {
        println!("ok       {}", key);
    }
    for (name, reason) in &report.corrupt {
        println!("corrupt  {} ({})", name, reason);
    }

    if !report.corrupt.is_empty() {
        anyhow::bail!(
            "{} corrupt entries; they will be rebuilt on next use, or run `bridgeboot cache clean`",
            report.corrupt.len()
        );
    }

    println!("{} {} entries verified.", bridgeboot_prefix(), report.valid.len());
    Ok(())
}

/// Remove one entry or all entries
fn clean(store: &ArtifactStore, key: Option<&str>, all: bool) -> Result<()> {
    if all {
        println!("{} Cleaning all cached bridges...", bridgeboot_prefix());
        let removed = store.clean_all().context("Failed to clean cache")?;
        println!("{} Removed {} entries.", bridgeboot_prefix(), removed);
        return Ok(());
    }

    let Some(key) = key else {
        anyhow::bail!("Specify --all to clean all bridges, or --key <KEY>");
    };
    let key = CompilerCacheKey::parse(key)?;

    if store.remove(&key)? {
        println!("{} Removed {}.", bridgeboot_prefix(), key);
    } else {
        println!("{} Not cached: {}", bridgeboot_prefix(), key);
    }

    Ok(())
}
