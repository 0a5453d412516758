//! Error taxonomy for bridge bootstrapping.
//!
//! Every failure that reaches the top-level caller is one of the three
//! [`BootstrapError`] variants. The error is `Clone` so that the outcome of a
//! single in-flight build can be handed to every caller waiting on it.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum BootstrapError {
    /// Settings are missing, malformed or inconsistent. Not retried.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The bridge builder failed for this key. Nothing was published.
    #[error("Failed to build compiler bridge {key}: {cause}")]
    BuildFailed { key: String, cause: BuildFailure },

    /// The cache directory (or delivery target) could not be read or written.
    #[error("Store unavailable at {}: {source}", .path.display())]
    StoreUnavailable {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
}

impl BootstrapError {
    pub fn store(path: impl Into<PathBuf>, source: io::Error) -> Self {
        BootstrapError::StoreUnavailable {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Process exit code reported by the CLI for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            BootstrapError::InvalidConfiguration(_) => 2,
            BootstrapError::BuildFailed { .. } => 3,
            BootstrapError::StoreUnavailable { .. } => 4,
        }
    }
}

/// Why a builder could not produce an artifact
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildFailure {
    #[error("build timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("compiler exited with {}: {stderr}", .code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    CompilerExited { code: Option<i32>, stderr: String },

    #[error("builder produced no artifact at {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("input {} changed during the build", .0.display())]
    InputChanged(PathBuf),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl From<io::Error> for BuildFailure {
    fn from(err: io::Error) -> Self {
        BuildFailure::Io(err.to_string())
    }
}
