//! Cross-process lock per cache key
//!
//! A lock is a file `locks/<key>.lock` created with `create_new`, holding the
//! owner's pid, hostname and creation time. Whoever creates the file owns the
//! key until the guard drops. While held, a heartbeat thread keeps the file's
//! mtime fresh.
//!
//! A lock is broken only when its owner is provably gone:
//! - same host: the owner pid is no longer running (age is ignored on unix)
//! - other host, or owner unreadable: no heartbeat for `stale_after`

use chrono::{DateTime, Utc};
use filetime::{set_file_mtime, FileTime};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

use crate::cache_key::CompilerCacheKey;
use crate::error::BootstrapError;
use crate::logging::{services, status};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Time without a heartbeat after which a lock from another host is abandoned
    pub stale_after: Duration,
    /// Delay between attempts while another owner holds the lock
    pub poll_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(30 * 60),
            poll_interval: Duration::from_millis(200),
        }
    }
}

impl LockOptions {
    /// How often a held lock is touched; several beats fit in `stale_after`
    fn heartbeat_interval(&self) -> Duration {
        (self.stale_after / 4).max(Duration::from_millis(10))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    pub hostname: String,
    pub created_at: DateTime<Utc>,
}

impl LockOwner {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            hostname: current_hostname(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug)]
struct Heartbeat {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Exclusive ownership of one cache key; released on drop
#[derive(Debug)]
pub struct KeyLock {
    path: PathBuf,
    /// Exact bytes we wrote; the file is ours only while it still holds them
    owner: Vec<u8>,
    heartbeat: Option<Heartbeat>,
}

impl KeyLock {
    /// Block until the lock for `key` is ours
    pub fn acquire(
        locks_dir: &Path,
        key: &CompilerCacheKey,
        options: &LockOptions,
    ) -> Result<Self, BootstrapError> {
        let path = locks_dir.join(format!("{}.lock", key));
        let started = Instant::now();
        let mut announced = false;

        loop {
            match Self::try_create(&path) {
                Ok(mut lock) => {
                    if announced {
                        debug!(
                            service = services::LOCK,
                            key = %key,
                            waited_ms = started.elapsed().as_millis() as u64,
                            "Acquired lock after waiting"
                        );
                    }
                    lock.start_heartbeat(options.heartbeat_interval());
                    return Ok(lock);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(BootstrapError::store(&path, e)),
            }

            if let Some(reason) = stale_reason(&path, options.stale_after) {
                warn!(
                    service = services::LOCK,
                    status = status::STALE,
                    key = %key,
                    reason = %reason,
                    "Breaking stale lock"
                );
                break_lock(&path).map_err(|e| BootstrapError::store(&path, e))?;
                continue;
            }

            if !announced {
                info!(
                    service = services::LOCK,
                    status = status::WAITING,
                    key = %key,
                    "Waiting for another process building the same bridge"
                );
                announced = true;
            }
            thread::sleep(options.poll_interval);
        }
    }

    fn try_create(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let owner = serde_json::to_vec(&LockOwner::current()).map_err(io::Error::other)?;
        let lock = Self {
            path: path.to_path_buf(),
            owner,
            heartbeat: None,
        };

        // From here on the guard removes the file, even if the write fails
        file.write_all(&lock.owner)?;
        file.sync_all()?;

        Ok(lock)
    }

    fn start_heartbeat(&mut self, interval: Duration) {
        let (stop, stopped) = mpsc::channel::<()>();
        let path = self.path.clone();
        let owner = self.owner.clone();

        let spawned = thread::Builder::new()
            .name("bridgeboot-lock-heartbeat".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
                if !holds(&path, &owner) {
                    warn!(
                        service = services::LOCK,
                        path = %path.display(),
                        "Lock was taken over while held"
                    );
                    return;
                }
                if let Err(e) = set_file_mtime(&path, FileTime::now()) {
                    debug!(
                        service = services::LOCK,
                        path = %path.display(),
                        error = %e,
                        "Failed to refresh lock"
                    );
                }
            });

        match spawned {
            Ok(handle) => self.heartbeat = Some(Heartbeat { stop, handle }),
            Err(e) => warn!(
                service = services::LOCK,
                error = %e,
                "Lock heartbeat unavailable; long builds may be taken over from other hosts"
            ),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            drop(heartbeat.stop);
            let _ = heartbeat.handle.join();
        }

        // Never remove a lock that now belongs to someone else
        if !holds(&self.path, &self.owner) {
            debug!(
                service = services::LOCK,
                path = %self.path.display(),
                "Lock no longer ours; leaving it in place"
            );
            return;
        }

        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(
                    service = services::LOCK,
                    path = %self.path.display(),
                    error = %e,
                    "Failed to release lock"
                );
            }
        }
    }
}

/// Whether the file at `path` still carries `owner`
fn holds(path: &Path, owner: &[u8]) -> bool {
    fs::read(path).map(|bytes| bytes == owner).unwrap_or(false)
}

/// Why the lock at `path` may be broken, or None if it must be respected
fn stale_reason(path: &Path, stale_after: Duration) -> Option<String> {
    // Owner may still be writing its record; judge by age alone then
    let owner: Option<LockOwner> = fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok());

    if let Some(owner) = owner.filter(|o| o.hostname == current_hostname()) {
        match is_process_running(owner.pid) {
            Some(true) => return None,
            Some(false) => return Some(format!("owner process {} is gone", owner.pid)),
            None => {}
        }
    }

    let age = fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok());

    match age {
        Some(age) if age > stale_after => Some(format!("no heartbeat for {}s", age.as_secs())),
        _ => None,
    }
}

/// Move the stale file aside before deleting it so two breakers cannot both
/// succeed on the same file
fn break_lock(path: &Path) -> io::Result<()> {
    let aside = path.with_extension(format!(
        "stale.{}.{}",
        std::process::id(),
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));

    match fs::rename(path, &aside) {
        Ok(()) => fs::remove_file(&aside),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn current_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Check if a process is running, None when this platform cannot tell
#[cfg(unix)]
fn is_process_running(pid: u32) -> Option<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // Signal 0 only probes; EPERM means it exists under another user
    match kill(Pid::from_raw(pid as i32), None::<Signal>) {
        Ok(()) => Some(true),
        Err(Errno::EPERM) => Some(true),
        Err(_) => Some(false),
    }
}

/// Without a portable liveness probe, locks expire by heartbeat age only
#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> Option<bool> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn key() -> CompilerCacheKey {
        CompilerCacheKey::parse("bridge-2.12.15-0123456789abcdef01234567").unwrap()
    }

    fn fast() -> LockOptions {
        LockOptions {
            stale_after: Duration::from_secs(60),
            poll_interval: Duration::from_millis(10),
        }
    }

    fn write_owner(path: &Path, owner: &LockOwner) {
        fs::write(path, serde_json::to_vec(owner).unwrap()).unwrap();
    }

    #[test]
    fn test_lock_file_lifecycle() {
        let dir = TempDir::new().unwrap();

        let lock = KeyLock::acquire(dir.path(), &key(), &fast()).unwrap();
        let path = lock.path().to_path_buf();
        assert!(path.exists());

        let owner: LockOwner = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(owner.pid, std::process::id());

        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_second_owner_waits_for_release() {
        let dir = TempDir::new().unwrap();
        let locks_dir = dir.path().to_path_buf();
        let first = KeyLock::acquire(&locks_dir, &key(), &fast()).unwrap();

        let released = Arc::new(AtomicBool::new(false));
        let waiter = {
            let released = Arc::clone(&released);
            thread::spawn(move || {
                let _second = KeyLock::acquire(&locks_dir, &key(), &fast()).unwrap();
                released.load(Ordering::SeqCst)
            })
        };

        thread::sleep(Duration::from_millis(100));
        released.store(true, Ordering::SeqCst);
        drop(first);

        assert!(waiter.join().unwrap(), "second owner got the lock early");
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_of_dead_process_is_broken() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(format!("{}.lock", key()));

        // A child that has exited and been reaped leaves a free pid behind
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();

        write_owner(
            &path,
            &LockOwner {
                pid: dead_pid,
                hostname: current_hostname(),
                created_at: Utc::now(),
            },
        );

        let lock = KeyLock::acquire(dir.path(), &key(), &fast()).unwrap();
        let owner: LockOwner = serde_json::from_slice(&fs::read(lock.path()).unwrap()).unwrap();
        assert_eq!(owner.pid, std::process::id());
    }

    #[test]
    fn test_live_owner_is_respected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("held.lock");
        write_owner(
            &path,
            &LockOwner {
                pid: std::process::id(),
                hostname: current_hostname(),
                created_at: Utc::now(),
            },
        );

        set_file_mtime(&path, FileTime::from_unix_time(0, 0)).unwrap();

        assert_eq!(stale_reason(&path, Duration::from_millis(1)), None);
    }

    #[test]
    fn test_live_owner_outlives_stale_after() {
        let dir = TempDir::new().unwrap();
        let locks_dir = dir.path().to_path_buf();
        let options = LockOptions {
            stale_after: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
        };
        let first = KeyLock::acquire(&locks_dir, &key(), &options).unwrap();

        // Far older than stale_after, but the owner (us) is still running
        set_file_mtime(first.path(), FileTime::from_unix_time(0, 0)).unwrap();
        assert_eq!(stale_reason(first.path(), options.stale_after), None);

        let released = Arc::new(AtomicBool::new(false));
        let waiter = {
            let released = Arc::clone(&released);
            thread::spawn(move || {
                let second = KeyLock::acquire(&locks_dir, &key(), &options).unwrap();
                (released.load(Ordering::SeqCst), second)
            })
        };

        thread::sleep(Duration::from_millis(300));
        released.store(true, Ordering::SeqCst);
        drop(first);

        let (after_release, second) = waiter.join().unwrap();
        assert!(after_release, "live owner's lock was broken by age");
        assert!(second.path().exists());
    }

    #[test]
    fn test_heartbeat_keeps_lock_fresh() {
        let dir = TempDir::new().unwrap();
        let options = LockOptions {
            stale_after: Duration::from_millis(80),
            poll_interval: Duration::from_millis(10),
        };
        let lock = KeyLock::acquire(dir.path(), &key(), &options).unwrap();
        set_file_mtime(lock.path(), FileTime::from_unix_time(0, 0)).unwrap();

        thread::sleep(Duration::from_millis(150));

        let modified = fs::metadata(lock.path()).unwrap().modified().unwrap();
        let age = SystemTime::now().duration_since(modified).unwrap_or_default();
        assert!(age < Duration::from_secs(5), "lock not refreshed, age {:?}", age);
    }

    #[test]
    fn test_drop_leaves_foreign_lock_alone() {
        let dir = TempDir::new().unwrap();
        let lock = KeyLock::acquire(dir.path(), &key(), &fast()).unwrap();
        let path = lock.path().to_path_buf();

        // Someone else took the key over while we held it
        let usurper = LockOwner {
            pid: std::process::id(),
            hostname: "build-agent-7".to_string(),
            created_at: Utc::now(),
        };
        write_owner(&path, &usurper);

        drop(lock);

        let owner: LockOwner = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(owner, usurper);
    }

    #[test]
    fn test_old_lock_is_stale() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.lock");
        write_owner(
            &path,
            &LockOwner {
                pid: std::process::id(),
                hostname: "some-other-host".to_string(),
                created_at: Utc::now(),
            },
        );
        thread::sleep(Duration::from_millis(20));

        assert!(stale_reason(&path, Duration::from_millis(1)).is_some());
        assert!(stale_reason(&path, Duration::from_secs(60)).is_none());
    }

    #[test]
    fn test_unreadable_lock_judged_by_age() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.lock");
        fs::write(&path, b"{\"pid\":").unwrap();

        assert!(stale_reason(&path, Duration::from_secs(60)).is_none());
    }

    #[test]
    fn test_break_lock_tolerates_concurrent_breaker() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.lock");

        break_lock(&path).unwrap();

        fs::write(&path, b"x").unwrap();
        break_lock(&path).unwrap();
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
