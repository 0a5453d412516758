use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::lock::{KeyLock, LockOptions};
use super::record::{BuildRecord, RECORD_FILE_NAME, RECORD_FORMAT_VERSION};
use super::single_flight::{Abandoned, SingleFlight};
use super::{Artifact, ArtifactOrigin};
use crate::builder::{BridgeBuilder, ARTIFACT_FILE_NAME};
use crate::cache_key::CompilerCacheKey;
use crate::error::{BootstrapError, BuildFailure};
use crate::fingerprint::hash_file;
use crate::logging::{operations, services, status};
use crate::settings::CacheSettings;

const BRIDGES_DIR: &str = "bridges";
const LOCKS_DIR: &str = "locks";
const STAGING_DIR: &str = "staging";

/// State of one entry on disk
#[derive(Debug)]
enum EntryState {
    Missing,
    Corrupt(String),
    Valid(Artifact),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub root: PathBuf,
    pub entries: usize,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub valid: Vec<CompilerCacheKey>,
    /// (entry directory name, reason)
    pub corrupt: Vec<(String, String)>,
}

/// Filesystem-backed store of compiler bridges
///
/// Layout:
/// - `<root>/bridges/<key>/compiler-bridge.jar` - Published artifact
/// - `<root>/bridges/<key>/record.json` - Build record (size, sha256, ...)
/// - `<root>/locks/<key>.lock` - Cross-process build lock
/// - `<root>/staging/` - Private build directories, renamed into `bridges/`
///
/// Guarantees:
/// - An entry is visible only once complete (single directory rename)
/// - At most one build per key, across threads and processes
/// - Entries failing their integrity check are rebuilt, never served
pub struct ArtifactStore {
    root: PathBuf,
    bridges_dir: PathBuf,
    locks_dir: PathBuf,
    staging_dir: PathBuf,
    lock_options: LockOptions,
    flights: SingleFlight<CompilerCacheKey, Result<Artifact, BootstrapError>>,
}

impl ArtifactStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn new<P: AsRef<Path>>(root: P, lock_options: LockOptions) -> Result<Self, BootstrapError> {
        let root = root.as_ref().to_path_buf();
        let bridges_dir = root.join(BRIDGES_DIR);
        let locks_dir = root.join(LOCKS_DIR);
        let staging_dir = root.join(STAGING_DIR);

        for dir in [&bridges_dir, &locks_dir, &staging_dir] {
            fs::create_dir_all(dir).map_err(|e| BootstrapError::store(dir, e))?;
        }

        debug!(service = services::STORE, root = %root.display(), "Opened artifact store");

        Ok(Self {
            root,
            bridges_dir,
            locks_dir,
            staging_dir,
            lock_options,
            flights: SingleFlight::new(),
        })
    }

    pub fn open(settings: &CacheSettings) -> Result<Self, BootstrapError> {
        Self::new(
            &settings.dir,
            LockOptions {
                stale_after: settings.lock_stale_after,
                poll_interval: settings.lock_poll_interval,
            },
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Entry directory of `key` (whether or not it exists)
    pub fn path_for(&self, key: &CompilerCacheKey) -> PathBuf {
        self.bridges_dir.join(key.as_str())
    }

    /// Return the artifact for `key`, building it on a miss
    ///
    /// Concurrent callers in this process share one build; other processes
    /// wait on the key's lock file. A failed build publishes nothing and is
    /// reported to every caller that waited on it.
    pub fn acquire(
        &self,
        key: &CompilerCacheKey,
        builder: &dyn BridgeBuilder,
    ) -> Result<Artifact, BootstrapError> {
        if let Some(artifact) = self.lookup(key)? {
            info!(
                service = services::STORE,
                operation = operations::ACQUIRE,
                status = status::HIT,
                key = %key,
                "Cache hit"
            );
            return Ok(artifact);
        }

        match self.flights.run(key, || self.acquire_exclusive(key, builder)) {
            Ok(flight) if flight.shared => {
                debug!(
                    service = services::STORE,
                    operation = operations::ACQUIRE,
                    status = status::SHARED,
                    key = %key,
                    "Joined in-flight build"
                );
                flight.value.map(|artifact| Artifact {
                    origin: ArtifactOrigin::Shared,
                    ..artifact
                })
            }
            Ok(flight) => flight.value,
            Err(Abandoned) => Err(BootstrapError::BuildFailed {
                key: key.to_string(),
                cause: BuildFailure::Other("builder panicked".to_string()),
            }),
        }
    }

    /// Return the artifact for `key` if a valid entry exists
    ///
    /// Corrupt entries read as misses; they are repaired by the next build.
    pub fn lookup(&self, key: &CompilerCacheKey) -> Result<Option<Artifact>, BootstrapError> {
        match self.inspect(key)? {
            EntryState::Valid(artifact) => Ok(Some(artifact)),
            EntryState::Corrupt(reason) => {
                debug!(
                    service = services::STORE,
                    operation = operations::VERIFY,
                    status = status::CORRUPT,
                    key = %key,
                    reason = %reason,
                    "Ignoring corrupt entry"
                );
                Ok(None)
            }
            EntryState::Missing => Ok(None),
        }
    }

    /// Records of all readable entries, sorted by key
    pub fn list(&self) -> Result<Vec<BuildRecord>, BootstrapError> {
        let mut records = Vec::new();
        for name in self.entry_names()? {
            let record_path = self.bridges_dir.join(&name).join(RECORD_FILE_NAME);
            match BuildRecord::read(&record_path) {
                Ok(record) => records.push(record),
                Err(e) => debug!(
                    service = services::STORE,
                    entry = %name,
                    error = %e,
                    "Skipping entry without readable record"
                ),
            }
        }
        Ok(records)
    }

    pub fn stats(&self) -> Result<StoreStats, BootstrapError> {
        let records = self.list()?;
        Ok(StoreStats {
            root: self.root.clone(),
            entries: records.len(),
            total_bytes: records.iter().map(|r| r.size_bytes).sum(),
        })
    }

    /// Run the integrity check on every entry without modifying anything
    pub fn verify_all(&self) -> Result<VerifyReport, BootstrapError> {
        let mut report = VerifyReport::default();
        for name in self.entry_names()? {
            let key = match CompilerCacheKey::parse(&name) {
                Ok(key) => key,
                Err(_) => {
                    report.corrupt.push((name, "not a cache key".to_string()));
                    continue;
                }
            };
            match self.inspect(&key)? {
                EntryState::Valid(_) => report.valid.push(key),
                EntryState::Corrupt(reason) => report.corrupt.push((name, reason)),
                // Removed while we were scanning
                EntryState::Missing => {}
            }
        }
        Ok(report)
    }

    /// Delete the entry for `key`; returns whether one existed
    pub fn remove(&self, key: &CompilerCacheKey) -> Result<bool, BootstrapError> {
        let _lock = KeyLock::acquire(&self.locks_dir, key, &self.lock_options)?;
        let existed = self.discard_entry(key)?;
        if existed {
            info!(
                service = services::STORE,
                operation = operations::EVICT,
                key = %key,
                "Removed entry"
            );
        }
        Ok(existed)
    }

    /// Delete every entry and abandoned staging dir; returns how many
    /// entries were removed
    pub fn clean_all(&self) -> Result<usize, BootstrapError> {
        self.sweep_staging()?;

        let mut removed = 0;
        for name in self.entry_names()? {
            match CompilerCacheKey::parse(&name) {
                Ok(key) => {
                    if self.remove(&key)? {
                        removed += 1;
                    }
                }
                Err(_) => {
                    let path = self.bridges_dir.join(&name);
                    remove_path(&path).map_err(|e| BootstrapError::store(&path, e))?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Remove staging dirs left by builders that died before publishing
    ///
    /// A build creates its staging dir only while holding the key's lock, so
    /// a dir whose key has no lock file has no live owner.
    pub fn sweep_staging(&self) -> Result<usize, BootstrapError> {
        let read_dir = fs::read_dir(&self.staging_dir)
            .map_err(|e| BootstrapError::store(&self.staging_dir, e))?;

        let mut swept = 0;
        for entry in read_dir {
            let entry = entry.map_err(|e| BootstrapError::store(&self.staging_dir, e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            let key = name.split('.').next().unwrap_or_default();
            if self.locks_dir.join(format!("{}.lock", key)).exists() {
                continue;
            }

            let path = entry.path();
            match remove_path(&path) {
                Ok(()) => swept += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(BootstrapError::store(&path, e)),
            }
        }

        if swept > 0 {
            info!(
                service = services::STORE,
                operation = operations::EVICT,
                swept,
                "Removed abandoned staging dirs"
            );
        }
        Ok(swept)
    }

    /// Miss path: runs while holding the key's lock file
    fn acquire_exclusive(
        &self,
        key: &CompilerCacheKey,
        builder: &dyn BridgeBuilder,
    ) -> Result<Artifact, BootstrapError> {
        let _lock = KeyLock::acquire(&self.locks_dir, key, &self.lock_options)?;

        // Another process may have published while we waited for the lock
        match self.inspect(key)? {
            EntryState::Valid(artifact) => {
                info!(
                    service = services::STORE,
                    operation = operations::ACQUIRE,
                    status = status::HIT,
                    key = %key,
                    "Cache hit after waiting for lock"
                );
                return Ok(artifact);
            }
            EntryState::Corrupt(reason) => {
                warn!(
                    service = services::STORE,
                    operation = operations::VERIFY,
                    status = status::CORRUPT,
                    key = %key,
                    reason = %reason,
                    "Discarding corrupt entry"
                );
                self.discard_entry(key)?;
            }
            EntryState::Missing => {}
        }

        info!(
            service = services::STORE,
            operation = operations::ACQUIRE,
            status = status::MISS,
            key = %key,
            builder = %builder.describe(),
            "Cache miss, building bridge"
        );
        self.build_and_publish(key, builder)
    }

    fn build_and_publish(
        &self,
        key: &CompilerCacheKey,
        builder: &dyn BridgeBuilder,
    ) -> Result<Artifact, BootstrapError> {
        // Removed on drop unless renamed into place
        let staging = tempfile::Builder::new()
            .prefix(&format!("{}.", key))
            .tempdir_in(&self.staging_dir)
            .map_err(|e| BootstrapError::store(&self.staging_dir, e))?;

        let build_failed = |cause: BuildFailure| {
            warn!(
                service = services::STORE,
                operation = operations::BUILD,
                status = status::ERROR,
                key = %key,
                error = %cause,
                "Build failed, nothing published"
            );
            BootstrapError::BuildFailed {
                key: key.to_string(),
                cause,
            }
        };

        let started = Instant::now();
        let produced = builder.build(key, staging.path()).map_err(build_failed)?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let artifact_path = staging.path().join(ARTIFACT_FILE_NAME);
        if produced != artifact_path {
            if !produced.is_file() {
                return Err(build_failed(BuildFailure::MissingOutput(produced)));
            }
            fs::copy(&produced, &artifact_path).map_err(|e| build_failed(e.into()))?;
        }
        if !artifact_path.is_file() {
            return Err(build_failed(BuildFailure::MissingOutput(artifact_path)));
        }

        let store_err = |e: io::Error| BootstrapError::store(&artifact_path, e);
        File::open(&artifact_path)
            .and_then(|f| f.sync_all())
            .map_err(store_err)?;
        let size_bytes = fs::metadata(&artifact_path).map_err(store_err)?.len();
        let sha256 = hash_file(&artifact_path).map_err(store_err)?;

        let record = BuildRecord {
            format: RECORD_FORMAT_VERSION,
            cache_key: key.to_string(),
            artifact_file: ARTIFACT_FILE_NAME.to_string(),
            size_bytes,
            sha256,
            builder: builder.describe(),
            duration_ms,
            created_at: chrono::Utc::now(),
        };
        let record_path = staging.path().join(RECORD_FILE_NAME);
        record
            .write(&record_path)
            .map_err(|e| BootstrapError::store(&record_path, e))?;

        let entry_dir = self.path_for(key);
        // Leftover that failed inspection; we hold the lock
        self.discard_entry(key)?;
        fs::rename(staging.path(), &entry_dir)
            .map_err(|e| BootstrapError::store(&entry_dir, e))?;

        info!(
            service = services::STORE,
            operation = operations::PUBLISH,
            status = status::BUILT,
            key = %key,
            size_bytes,
            duration_ms,
            "Published bridge"
        );

        Ok(Artifact {
            key: key.clone(),
            path: entry_dir.join(ARTIFACT_FILE_NAME),
            record,
            origin: ArtifactOrigin::Built,
        })
    }

    /// Integrity check: record parses and matches the key, artifact exists
    /// with the recorded size and checksum
    fn inspect(&self, key: &CompilerCacheKey) -> Result<EntryState, BootstrapError> {
        let entry_dir = self.path_for(key);
        match fs::metadata(&entry_dir) {
            Ok(meta) if !meta.is_dir() => {
                return Ok(EntryState::Corrupt("entry is not a directory".to_string()))
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(EntryState::Missing),
            Err(e) => return Err(BootstrapError::store(&entry_dir, e)),
        }

        let record_path = entry_dir.join(RECORD_FILE_NAME);
        let record = match BuildRecord::read(&record_path) {
            Ok(record) => record,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(EntryState::Corrupt("record is missing".to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Ok(EntryState::Corrupt(format!("record is unreadable: {}", e)))
            }
            Err(e) => return Err(BootstrapError::store(&record_path, e)),
        };

        if record.format != RECORD_FORMAT_VERSION {
            return Ok(EntryState::Corrupt(format!(
                "record format {} is not supported",
                record.format
            )));
        }
        if record.cache_key != key.as_str() {
            return Ok(EntryState::Corrupt(format!(
                "record belongs to {}",
                record.cache_key
            )));
        }
        if !is_plain_file_name(&record.artifact_file) {
            return Ok(EntryState::Corrupt(format!(
                "record names invalid artifact file {:?}",
                record.artifact_file
            )));
        }

        let artifact_path = entry_dir.join(&record.artifact_file);
        let size = match fs::metadata(&artifact_path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(EntryState::Corrupt("artifact is missing".to_string()))
            }
            Err(e) => return Err(BootstrapError::store(&artifact_path, e)),
        };
        if size != record.size_bytes {
            return Ok(EntryState::Corrupt(format!(
                "artifact is {} bytes, record says {}",
                size, record.size_bytes
            )));
        }

        let digest = hash_file(&artifact_path).map_err(|e| BootstrapError::store(&artifact_path, e))?;
        if digest != record.sha256 {
            return Ok(EntryState::Corrupt("artifact checksum mismatch".to_string()));
        }

        Ok(EntryState::Valid(Artifact {
            key: key.clone(),
            path: artifact_path,
            record,
            origin: ArtifactOrigin::Cached,
        }))
    }

    /// Remove an entry so that readers never observe it half-deleted
    ///
    /// Caller holds the key's lock.
    fn discard_entry(&self, key: &CompilerCacheKey) -> Result<bool, BootstrapError> {
        let entry_dir = self.path_for(key);
        if fs::symlink_metadata(&entry_dir).is_err() {
            return Ok(false);
        }

        // Rename into a private staging dir, which deletes it on drop
        let trash = tempfile::Builder::new()
            .prefix(&format!("{}.discard.", key))
            .tempdir_in(&self.staging_dir)
            .map_err(|e| BootstrapError::store(&self.staging_dir, e))?;
        match fs::rename(&entry_dir, trash.path().join("entry")) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BootstrapError::store(&entry_dir, e)),
        }
    }

    /// Entry directory names, sorted
    fn entry_names(&self) -> Result<Vec<String>, BootstrapError> {
        let read_dir =
            fs::read_dir(&self.bridges_dir).map_err(|e| BootstrapError::store(&self.bridges_dir, e))?;

        let mut names = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| BootstrapError::store(&self.bridges_dir, e))?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
}

fn remove_path(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
