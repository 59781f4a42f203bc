//! Directory-local sync snapshots.
//!
//! Each synchronized directory carries a hidden record of its file set as of
//! the last successful sync. The record is written atomically (temp file +
//! rename) so a reader never sees a half-written snapshot.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::scanner::FileEntry;

pub const SNAPSHOT_FILE_NAME: &str = ".deckmate-snapshot.json";
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("reading snapshot {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("snapshot {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("writing snapshot {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// File states of one directory as of its last successful sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub synced_at: String,
    /// Relative path -> modification time in milliseconds since the epoch.
    pub files: BTreeMap<String, i64>,
}

impl Snapshot {
    pub fn from_entries(entries: &[FileEntry]) -> Self {
        Snapshot {
            version: SNAPSHOT_VERSION,
            synced_at: Utc::now().to_rfc3339(),
            files: entries
                .iter()
                .map(|e| (e.rel.clone(), e.mtime_ms))
                .collect(),
        }
    }
}

/// Load the snapshot stored in `dir`. A missing record is `Ok(None)`.
pub fn load(dir: &Path) -> Result<Option<Snapshot>, SnapshotError> {
    let path = dir.join(SNAPSHOT_FILE_NAME);
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(SnapshotError::Read { path, source }),
    };
    let snap =
        serde_json::from_slice(&data).map_err(|source| SnapshotError::Malformed { path, source })?;
    Ok(Some(snap))
}

/// Write `snap` into `dir`, replacing any previous record in one rename.
pub fn store(dir: &Path, snap: &Snapshot) -> Result<(), SnapshotError> {
    let path = dir.join(SNAPSHOT_FILE_NAME);
    let write = |p: &Path, s: &Snapshot| -> std::io::Result<()> {
        fs::create_dir_all(dir)?;
        let tmp = dir.join(format!("{SNAPSHOT_FILE_NAME}.tmp"));
        let data = serde_json::to_vec(s).expect("snapshot serializes");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, p)
    };
    write(&path, snap).map_err(|source| SnapshotError::Write { path, source })
}
