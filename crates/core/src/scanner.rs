//! Enumerates save files under a directory root with their modification times.

use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

use crate::snapshot::SNAPSHOT_FILE_NAME;

/// One file under a scanned root, keyed by its root-relative path.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub rel: String,
    pub abs: PathBuf,
    pub mtime_ms: i64,
}

/// Recursively list the files under `root`, excluding the snapshot record and
/// any path matching `excludes`. A missing root is treated as empty.
pub fn scan_dir(root: &Path, excludes: &GlobSet) -> anyhow::Result<Vec<FileEntry>> {
    let mut entries = Vec::new();
    if !root.is_dir() {
        return Ok(entries);
    }

    for entry in WalkDir::new(root).follow_links(false) {
        let entry =
            entry.with_context(|| format!("enumerating files under {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy();
        if name == SNAPSHOT_FILE_NAME || name == snapshot_temp_name().as_str() {
            continue;
        }

        let rel = path
            .strip_prefix(root)
            .expect("walked path is under its root")
            .to_string_lossy()
            .into_owned();
        if excludes.is_match(&rel) {
            continue;
        }

        let meta = fs::metadata(path)
            .with_context(|| format!("reading metadata for {}", path.display()))?;
        entries.push(FileEntry {
            rel,
            abs: path.to_path_buf(),
            mtime_ms: mtime_millis(&meta),
        });
    }

    Ok(entries)
}

/// Newest modification time across `entries`, 0 when empty.
pub fn max_mtime(entries: &[FileEntry]) -> i64 {
    entries.iter().map(|e| e.mtime_ms).max().unwrap_or(0)
}

pub fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("invalid exclude glob {pat:?}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

fn snapshot_temp_name() -> String {
    format!("{SNAPSHOT_FILE_NAME}.tmp")
}

fn mtime_millis(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
