/// Bridge bootstrapping
///
/// Ties the pieces together for one request: resolve the runtime, derive
/// the cache key, obtain the artifact from the store (building on a miss)
/// and optionally deliver a copy to `--out`.
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::builder::{self, BridgeBuilder};
use crate::cache_key::{CacheKeyBuilder, CompilerCacheKey};
use crate::error::BootstrapError;
use crate::logging::{operations, services};
use crate::runtime::CompilerRuntime;
use crate::settings::Settings;
use crate::store::{Artifact, ArtifactStore};

#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    pub key: CompilerCacheKey,
    pub artifact: Artifact,
    /// Copy written to `--out`, if requested
    pub delivered: Option<PathBuf>,
}

impl BootstrapOutcome {
    /// The path callers should put on their classpath
    pub fn path(&self) -> &Path {
        self.delivered.as_deref().unwrap_or(&self.artifact.path)
    }
}

/// Bootstrap the bridge described by `settings` with its configured builder
pub fn run(settings: &Settings, store: &ArtifactStore) -> Result<BootstrapOutcome, BootstrapError> {
    let runtime = CompilerRuntime::from_settings(settings);
    let builder = builder::for_settings(settings, &runtime);
    run_with_builder(settings, store, builder.as_ref())
}

/// Bootstrap with an explicit builder
pub fn run_with_builder(
    settings: &Settings,
    store: &ArtifactStore,
    builder: &dyn BridgeBuilder,
) -> Result<BootstrapOutcome, BootstrapError> {
    let runtime = CompilerRuntime::from_settings(settings);
    let key = CacheKeyBuilder::build(settings, &runtime.identity())?;
    debug!(
        service = services::BOOTSTRAP,
        key = %key,
        scala_version = %runtime.version,
        "Derived cache key"
    );

    let artifact = store.acquire(&key, builder)?;

    let delivered = match &settings.out {
        Some(out) => Some(deliver(&artifact, out, &runtime)?),
        None => None,
    };

    info!(
        service = services::BOOTSTRAP,
        key = %key,
        origin = artifact.origin.as_str(),
        path = %delivered.as_deref().unwrap_or(&artifact.path).display(),
        "Compiler bridge ready"
    );

    Ok(BootstrapOutcome {
        key,
        artifact,
        delivered,
    })
}

/// Atomically copy the artifact to `out`
///
/// An existing directory receives `compiler-bridge_<version>.jar`; anything
/// else is the target file itself. The target is replaced in one rename, so
/// readers see either the old file or the complete new one.
pub fn deliver(
    artifact: &Artifact,
    out: &Path,
    runtime: &CompilerRuntime,
) -> Result<PathBuf, BootstrapError> {
    let target = if out.is_dir() {
        out.join(format!("compiler-bridge_{}.jar", runtime.version))
    } else {
        out.to_path_buf()
    };

    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let store_err = |e: io::Error| BootstrapError::store(&target, e);

    fs::create_dir_all(&parent).map_err(store_err)?;
    let mut tmp = NamedTempFile::new_in(&parent).map_err(store_err)?;
    let mut source =
        File::open(&artifact.path).map_err(|e| BootstrapError::store(&artifact.path, e))?;
    io::copy(&mut source, tmp.as_file_mut()).map_err(store_err)?;
    tmp.as_file().sync_all().map_err(store_err)?;
    tmp.persist(&target).map_err(|e| store_err(e.error))?;

    debug!(
        service = services::BOOTSTRAP,
        operation = operations::DELIVER,
        target = %target.display(),
        "Delivered bridge"
    );
    Ok(target)
}
