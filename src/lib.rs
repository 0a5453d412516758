// Library interface for bridgeboot
// The binary and integration tests both build on these modules

pub mod bootstrap;
pub mod builder;
pub mod cache_key;
pub mod cli;
pub mod cli_utils;
pub mod config;
pub mod config_discovery;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod runtime;
pub mod settings;
pub mod store;

// Re-export commonly used types
pub use bootstrap::BootstrapOutcome;
pub use builder::BridgeBuilder;
pub use cache_key::{CacheKeyBuilder, CompilerCacheKey};
pub use error::{BootstrapError, BuildFailure};
pub use settings::Settings;
pub use store::{default_cache_dir, Artifact, ArtifactOrigin, ArtifactStore};
