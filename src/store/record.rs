use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

/// Metadata file published next to every artifact
pub const RECORD_FILE_NAME: &str = "record.json";

/// Bump when the record layout changes; older entries become corrupt
pub const RECORD_FORMAT_VERSION: u32 = 1;

/// What was built, by whom, and what the artifact must look like
///
/// Written into the staging directory before publication, so a published
/// entry always carries a complete record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub format: u32,
    pub cache_key: String,
    /// File name of the artifact inside the entry directory
    pub artifact_file: String,
    pub size_bytes: u64,
    pub sha256: String,
    /// Builder description, e.g. "scalac 2.12.15 via java"
    pub builder: String,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl BuildRecord {
    /// Read a record; malformed JSON is reported as `InvalidData`
    pub fn read(path: &Path) -> io::Result<Self> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Write and fsync the record
    pub fn write(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(io::Error::other)?;
        let mut file = File::create(path)?;
        file.write_all(&json)?;
        file.sync_all()
    }
}
