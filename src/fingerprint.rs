/// Content fingerprints for bootstrap inputs
///
/// A fingerprint is the hex-encoded SHA-256 of a file's bytes, or, for a
/// directory, of every regular file below it (relative path + content hash,
/// in sorted order). Paths outside the tree never influence the result, so
/// identical inputs fingerprint identically on every machine.
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Fingerprint a file or directory tree
pub fn fingerprint_path(path: &Path) -> Result<String> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to read metadata: {}", path.display()))?;

    if metadata.is_dir() {
        fingerprint_dir(path)
    } else {
        hash_file(path).with_context(|| format!("Failed to hash file: {}", path.display()))
    }
}

/// SHA-256 of a single file, streamed
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

fn fingerprint_dir(dir: &Path) -> Result<String> {
    let files = list_files(dir)?;

    let mut hasher = Sha256::new();
    for file in &files {
        let rel_path = file.strip_prefix(dir).unwrap_or(file);
        // Normalize separators so Windows and Unix agree
        let rel = rel_path.to_string_lossy().replace('\\', "/");
        let file_hash =
            hash_file(file).with_context(|| format!("Failed to hash file: {}", file.display()))?;

        hasher.update(rel.as_bytes());
        hasher.update([0u8]);
        hasher.update(file_hash.as_bytes());
        hasher.update([0u8]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// All regular files below `dir`, sorted for deterministic ordering
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.with_context(|| format!("Failed to walk: {}", dir.display()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}
