/// Concurrency tests for the artifact store
///
/// Separate `ArtifactStore` instances on one root share nothing in memory,
/// so they coordinate only through lock files, the same way separate
/// processes do.
use bridgeboot::builder::ARTIFACT_FILE_NAME;
use bridgeboot::store::lock::LockOptions;
use bridgeboot::{ArtifactOrigin, ArtifactStore, BootstrapError, BuildFailure, CompilerCacheKey};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn key() -> CompilerCacheKey {
    CompilerCacheKey::parse("bridge-2.12.15-aaaaaaaaaaaaaaaaaaaaaaaa").unwrap()
}

fn options() -> LockOptions {
    LockOptions {
        stale_after: Duration::from_secs(60),
        poll_interval: Duration::from_millis(20),
    }
}

fn slow_builder(
    calls: Arc<AtomicUsize>,
) -> impl Fn(&CompilerCacheKey, &Path) -> Result<PathBuf, BuildFailure> + Send + Sync {
    move |_key: &CompilerCacheKey, staging: &Path| -> Result<PathBuf, BuildFailure> {
        calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(300));
        let out = staging.join(ARTIFACT_FILE_NAME);
        fs::write(&out, b"PK bridge")?;
        Ok(out)
    }
}

#[test]
fn test_independent_stores_build_once() {
    let dir = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(6));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let root = dir.path().to_path_buf();
            let calls = Arc::clone(&calls);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                // One store per thread: no shared in-process state
                let store = ArtifactStore::new(&root, options()).unwrap();
                barrier.wait();
                store.acquire(&key(), &slow_builder(calls)).unwrap()
            })
        })
        .collect();

    let artifacts: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        artifacts
            .iter()
            .filter(|a| a.origin == ArtifactOrigin::Built)
            .count(),
        1
    );
    for artifact in &artifacts {
        assert_eq!(artifact.path, artifacts[0].path);
        assert_eq!(artifact.read().unwrap(), b"PK bridge");
    }
}

#[test]
fn test_shared_store_reports_shared_origin() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ArtifactStore::new(dir.path(), options()).unwrap());
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let calls = Arc::clone(&calls);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.acquire(&key(), &slow_builder(calls)).unwrap().origin
            })
        })
        .collect();

    let origins: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(origins.iter().filter(|o| **o == ArtifactOrigin::Built).count(), 1);
    assert!(origins
        .iter()
        .all(|o| matches!(o, ArtifactOrigin::Built | ArtifactOrigin::Shared)));
}

#[test]
fn test_waiters_receive_the_leaders_failure() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ArtifactStore::new(dir.path(), options()).unwrap());
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let calls = Arc::clone(&calls);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let failing = move |_key: &CompilerCacheKey,
                                    _staging: &Path|
                      -> Result<PathBuf, BuildFailure> {
                    calls.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(300));
                    Err(BuildFailure::CompilerExited {
                        code: Some(1),
                        stderr: "type mismatch".to_string(),
                    })
                };
                barrier.wait();
                store.acquire(&key(), &failing)
            })
        })
        .collect();

    for handle in handles {
        match handle.join().unwrap() {
            Err(BootstrapError::BuildFailed { cause, .. }) => {
                assert!(cause.to_string().contains("type mismatch"))
            }
            other => panic!("expected build failure, got {:?}", other.map(|a| a.path)),
        }
    }

    // Every caller joined a failed build; late arrivals may have retried
    assert!(calls.load(Ordering::SeqCst) >= 1);
    assert!(store.lookup(&key()).unwrap().is_none());

    // Nothing poisoned: a working builder succeeds afterwards
    let artifact = store
        .acquire(&key(), &slow_builder(Arc::new(AtomicUsize::new(0))))
        .unwrap();
    assert_eq!(artifact.origin, ArtifactOrigin::Built);
}

#[cfg(unix)]
#[test]
fn test_stale_lock_from_dead_process_does_not_block() {
    let dir = TempDir::new().unwrap();
    let store = ArtifactStore::new(dir.path(), options()).unwrap();

    let mut child = std::process::Command::new("true").spawn().unwrap();
    let dead_pid = child.id();
    child.wait().unwrap();

    let hostname = hostname::get().unwrap().to_string_lossy().to_string();
    fs::write(
        dir.path().join("locks").join(format!("{}.lock", key())),
        format!(
            r#"{{"pid":{},"hostname":"{}","created_at":"2026-01-01T00:00:00Z"}}"#,
            dead_pid, hostname
        ),
    )
    .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let artifact = store.acquire(&key(), &slow_builder(Arc::clone(&calls))).unwrap();

    assert_eq!(artifact.origin, ArtifactOrigin::Built);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!dir.path().join("locks").join(format!("{}.lock", key())).exists());
}

#[test]
fn test_expired_lock_does_not_block() {
    let dir = TempDir::new().unwrap();
    let store = ArtifactStore::new(
        dir.path(),
        LockOptions {
            stale_after: Duration::from_millis(100),
            poll_interval: Duration::from_millis(20),
        },
    )
    .unwrap();

    // Owned by a live process on another host: only age can expire it
    fs::write(
        dir.path().join("locks").join(format!("{}.lock", key())),
        r#"{"pid":1,"hostname":"build-agent-7","created_at":"2026-01-01T00:00:00Z"}"#,
    )
    .unwrap();

    let artifact = store
        .acquire(&key(), &slow_builder(Arc::new(AtomicUsize::new(0))))
        .unwrap();
    assert_eq!(artifact.origin, ArtifactOrigin::Built);
}
