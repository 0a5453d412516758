use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::{default_cache_dir, LockOptions};

/// Complete bridgeboot configuration (loaded from TOML file)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BridgebootConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub build: BuildConfig,
}

/// Artifact cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Cache directory path (defaults to the platform cache dir)
    #[serde(default)]
    pub dir: Option<String>,

    /// Age after which a per-key lock file is considered abandoned
    #[serde(default = "default_lock_stale_after")]
    pub lock_stale_after: String,

    /// How often a waiting process re-checks a held lock
    #[serde(default = "default_lock_poll_interval")]
    pub lock_poll_interval: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            lock_stale_after: default_lock_stale_after(),
            lock_poll_interval: default_lock_poll_interval(),
        }
    }
}

/// Bridge compilation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildConfig {
    /// JVM launcher used to run the Scala compiler
    #[serde(default = "default_java")]
    pub java: String,

    /// Options passed to the JVM (heap size etc.)
    #[serde(default)]
    pub jvm_options: Vec<String>,

    /// Options passed to the Scala compiler
    #[serde(default)]
    pub compiler_options: Vec<String>,

    /// Maximum time a single bridge compilation may take
    #[serde(default)]
    pub timeout: Option<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            java: default_java(),
            jvm_options: Vec::new(),
            compiler_options: Vec::new(),
            timeout: None,
        }
    }
}

fn default_lock_stale_after() -> String {
    "30m".to_string()
}

fn default_lock_poll_interval() -> String {
    "200ms".to_string()
}

fn default_java() -> String {
    "java".to_string()
}

impl BridgebootConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: BridgebootConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config.validate().with_context(|| {
            format!("Invalid config file: {}", path.as_ref().display())
        })?;

        Ok(config)
    }

    /// Generate example configuration as TOML string
    pub fn example() -> Result<String> {
        let config = BridgebootConfig {
            cache: CacheConfig {
                dir: Some("~/.cache/bridgeboot".to_string()),
                ..Default::default()
            },
            build: BuildConfig {
                jvm_options: vec!["-Xmx1g".to_string()],
                compiler_options: vec!["-nowarn".to_string()],
                timeout: Some("10m".to_string()),
                ..Default::default()
            },
        };

        toml::to_string_pretty(&config).context("Failed to serialize example config")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(dir) = &self.cache.dir {
            if dir.trim().is_empty() {
                anyhow::bail!("cache.dir must not be empty when set");
            }
        }

        parse_duration(&self.cache.lock_stale_after)
            .context("cache.lock_stale_after is not a valid duration")?;
        let poll = parse_duration(&self.cache.lock_poll_interval)
            .context("cache.lock_poll_interval is not a valid duration")?;
        if poll.is_zero() {
            anyhow::bail!("cache.lock_poll_interval must be greater than zero");
        }

        if self.build.java.trim().is_empty() {
            anyhow::bail!("build.java must be set");
        }

        if let Some(timeout) = &self.build.timeout {
            parse_duration(timeout).context("build.timeout is not a valid duration")?;
        }

        Ok(())
    }

    /// Resolved cache directory (config value, else platform default)
    pub fn cache_dir(&self) -> PathBuf {
        self.cache
            .dir
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(default_cache_dir)
    }

    /// Lock timing from `[cache]`
    pub fn lock_options(&self) -> Result<LockOptions> {
        Ok(LockOptions {
            stale_after: parse_duration(&self.cache.lock_stale_after)?,
            poll_interval: parse_duration(&self.cache.lock_poll_interval)?,
        })
    }
}

/// Parse duration string (e.g., "200ms", "90s", "10m", "1h", "1d")
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(anyhow!("Empty duration string"));
    }

    if let Some(millis) = s.strip_suffix("ms") {
        let num: u64 = millis
            .parse()
            .map_err(|_| anyhow!("Invalid duration: {}", s))?;
        return Ok(Duration::from_millis(num));
    }

    let unit_start = s
        .char_indices()
        .last()
        .map(|(i, _)| i)
        .unwrap_or_default();
    let (num_str, unit) = s.split_at(unit_start);
    let num: u64 = num_str
        .parse()
        .map_err(|_| anyhow!("Invalid duration: {}", s))?;

    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => {
            return Err(anyhow!(
                "Invalid duration unit: {}. Use: ms, s, m, h, d",
                unit
            ))
        }
    };
    let seconds = num
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow!("Duration out of range: {}", s))?;

    Ok(Duration::from_secs(seconds))
}

/// Expand a leading `~/` to the user's home directory
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
