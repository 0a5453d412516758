//! Content-addressed store of bootstrapped compiler bridges
//!
//! [`ArtifactStore`] maps a [`CompilerCacheKey`] to a published bridge jar.
//! Entries are built at most once per key and published atomically; see
//! [`filesystem`] for the on-disk layout.

pub mod cache_dir;
pub mod filesystem;
pub mod lock;
pub mod record;
pub mod single_flight;

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::cache_key::CompilerCacheKey;

pub use cache_dir::default_cache_dir;
pub use filesystem::{ArtifactStore, StoreStats, VerifyReport};
pub use lock::LockOptions;
pub use record::BuildRecord;

/// How an [`Artifact`] was obtained by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOrigin {
    /// Valid entry already in the store
    Cached,
    /// Built by this caller
    Built,
    /// Built by a concurrent caller in this process
    Shared,
}

impl ArtifactOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactOrigin::Cached => "cached",
            ArtifactOrigin::Built => "built",
            ArtifactOrigin::Shared => "shared",
        }
    }
}

/// A verified, published compiler bridge
#[derive(Debug, Clone)]
pub struct Artifact {
    pub key: CompilerCacheKey,
    /// Path of the jar inside the store; never modified once published
    pub path: PathBuf,
    pub record: BuildRecord,
    pub origin: ArtifactOrigin,
}

impl Artifact {
    pub fn read(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.path)
    }
}
