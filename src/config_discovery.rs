use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::config::BridgebootConfig;

/// File name searched for in the working directory and its ancestors
pub const CONFIG_FILE_NAME: &str = "bridgeboot.toml";

/// Discovers bridgeboot configuration by traversing up the directory tree
pub fn discover_config(start_dir: &Path) -> Result<Option<PathBuf>> {
    let mut current = start_dir.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Ok(Some(config_path));
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    // Fallback to global config
    if let Some(home) = dirs::home_dir() {
        let global_config = home.join(".config/bridgeboot/config.toml");
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}

/// Loads configuration with auto-discovery support
///
/// An explicit path always wins. Otherwise the nearest `bridgeboot.toml`
/// above the current directory is used, and defaults when none exists.
/// Returns the path the configuration came from, if any.
pub fn load_config_with_discovery(
    explicit_path: Option<&str>,
) -> Result<(BridgebootConfig, Option<PathBuf>)> {
    if let Some(config_path) = explicit_path {
        let config = BridgebootConfig::from_file(config_path)?;
        return Ok((config, Some(PathBuf::from(config_path))));
    }

    match discover_config(&std::env::current_dir()?)? {
        Some(config_path) => {
            let config = BridgebootConfig::from_file(&config_path)?;
            Ok((config, Some(config_path)))
        }
        None => Ok((BridgebootConfig::default(), None)),
    }
}
