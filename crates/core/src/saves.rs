//! Save backup, restore, and snapshot-based synchronization.
//!
//! Mirroring is one-way copy-by-relative-path: same-path files at the
//! destination are overwritten, destination-only files are never deleted.

use anyhow::{Context, Result};
use globset::GlobSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::manifest::{self, MANIFEST_FILE_NAME};
use crate::paths;
use crate::scanner::{self, FileEntry};
use crate::snapshot::{self, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    Backup,
    Sync,
    Restore,
}

impl Strategy {
    /// Parse a configured strategy, falling back to `Backup` on anything
    /// missing or unrecognized.
    pub fn from_config(raw: Option<&str>) -> Strategy {
        match raw.map(|s| s.trim().to_lowercase()) {
            None => Strategy::Backup,
            Some(s) => match s.as_str() {
                "backup" => Strategy::Backup,
                "sync" => Strategy::Sync,
                "restore" => Strategy::Restore,
                other => {
                    warn!(strategy = other, "invalid save strategy, falling back to backup");
                    Strategy::Backup
                }
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    OriginalToBackup,
    BackupToOriginal,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::OriginalToBackup => "original -> backup",
            Direction::BackupToOriginal => "backup -> original",
        }
    }
}

/// The live save directory of a game and its mirror under the backup root.
#[derive(Debug, Clone)]
pub struct SavePair {
    pub original: PathBuf,
    pub backup: PathBuf,
}

/// What a single resolution did, for logging and assertions.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub direction: Option<Direction>,
    pub copied: usize,
    pub conflict: bool,
}

/// Process the saves of every game manifest under the configured games
/// directory. A failure on one game is logged and does not stop the others.
pub fn run(cfg: &AppConfig, strategy_override: Option<&str>) -> Result<()> {
    let Some(games_dir) = cfg.games_dir() else {
        warn!("games directory not configured, skipping saves");
        return Ok(());
    };
    if !games_dir.is_dir() {
        warn!(path = %games_dir.display(), "games directory does not exist, skipping saves");
        return Ok(());
    }
    let Some(saves_root) = cfg.saves_root() else {
        warn!("backup root not configured, skipping saves");
        return Ok(());
    };
    fs::create_dir_all(&saves_root)
        .with_context(|| format!("creating backup root {}", saves_root.display()))?;

    let strategy =
        Strategy::from_config(strategy_override.or(cfg.saves_strategy.as_deref()));
    let excludes = scanner::build_globset(&cfg.saves_exclude)?;

    let manifests = manifest::find_manifests(&games_dir)?;
    if manifests.is_empty() {
        info!(path = %games_dir.display(), "no {MANIFEST_FILE_NAME} found, nothing to process");
        return Ok(());
    }

    info!(strategy = ?strategy, root = %saves_root.display(), "processing game saves");
    for manifest_path in &manifests {
        if let Err(e) = process_manifest(manifest_path, &saves_root, strategy, &excludes) {
            error!(manifest = %manifest_path.display(), error = %e, "save handling failed");
        }
    }
    Ok(())
}

fn process_manifest(
    manifest_path: &Path,
    saves_root: &Path,
    strategy: Strategy,
    excludes: &GlobSet,
) -> Result<()> {
    let m = manifest::load(manifest_path)?;
    let title = if m.title.is_empty() {
        manifest_path
            .parent()
            .and_then(|d| d.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "game".to_string())
    } else {
        m.title.clone()
    };

    let Some(raw) = m.save_path.as_deref() else {
        info!(game = %title, "no savePath defined, skipping");
        return Ok(());
    };
    let Some(original) = paths::resolve_save_path(raw, manifest_path) else {
        warn!(game = %title, "empty savePath, skipping");
        return Ok(());
    };

    let pair = SavePair {
        original,
        backup: saves_root.join(paths::sanitize_title(&title)),
    };
    match strategy {
        Strategy::Backup => backup_pair(&pair, excludes, &title).map(|_| ()),
        Strategy::Sync => sync_pair(&pair, excludes, &title).map(|_| ()),
        Strategy::Restore => restore_pair(&pair, excludes, &title).map(|_| ()),
    }
}

/// Snapshot-driven two-way resolution: decide which side is authoritative,
/// mirror it to the other, then record the shared state on both sides.
pub fn sync_pair(pair: &SavePair, excludes: &GlobSet, title: &str) -> Result<SyncReport> {
    let mut report = SyncReport::default();

    let orig_entries = scanner::scan_dir(&pair.original, excludes)?;
    let back_entries = scanner::scan_dir(&pair.backup, excludes)?;

    let orig_snap = load_lenient(&pair.original);
    let back_snap = load_lenient(&pair.backup);

    let direction = if orig_snap.is_none() && back_snap.is_none() {
        if orig_entries.is_empty() && back_entries.is_empty() {
            info!(game = %title, "no save files on either side, nothing to sync");
            return Ok(report);
        }
        // First sync: the side holding the newest file is authoritative.
        // Ties keep the original side.
        if scanner::max_mtime(&back_entries) > scanner::max_mtime(&orig_entries) {
            Direction::BackupToOriginal
        } else {
            Direction::OriginalToBackup
        }
    } else {
        let orig_changed = changed_since(&orig_entries, orig_snap.as_ref());
        let back_changed = changed_since(&back_entries, back_snap.as_ref());
        match (orig_changed, back_changed) {
            (false, false) => {
                info!(game = %title, "no changes detected since last sync, skipping");
                return Ok(report);
            }
            (true, false) => Direction::OriginalToBackup,
            (false, true) => Direction::BackupToOriginal,
            (true, true) => {
                warn!(
                    game = %title,
                    "changes on both original and backup since last sync, keeping the original side"
                );
                report.conflict = true;
                Direction::OriginalToBackup
            }
        }
    };

    let (source, dest_root) = match direction {
        Direction::OriginalToBackup => (&orig_entries, &pair.backup),
        Direction::BackupToOriginal => (&back_entries, &pair.original),
    };
    report.copied = mirror(source, dest_root)?;
    report.direction = Some(direction);

    // Both sides now share the mirrored state; record it on each. A failed
    // write leaves the stale record in place so the next run retries.
    let orig_after = scanner::scan_dir(&pair.original, excludes)?;
    let back_after = scanner::scan_dir(&pair.backup, excludes)?;
    snapshot::store(&pair.original, &Snapshot::from_entries(&orig_after))?;
    snapshot::store(&pair.backup, &Snapshot::from_entries(&back_after))?;

    info!(
        game = %title,
        direction = direction.label(),
        copied = report.copied,
        "saves synchronized"
    );
    Ok(report)
}

/// Fixed-direction mirror into the backup folder. No snapshot bookkeeping.
pub fn backup_pair(pair: &SavePair, excludes: &GlobSet, title: &str) -> Result<SyncReport> {
    let entries = scanner::scan_dir(&pair.original, excludes)?;
    if entries.is_empty() {
        info!(game = %title, path = %pair.original.display(), "no save files found, skipping backup");
        return Ok(SyncReport::default());
    }
    fs::create_dir_all(&pair.backup)
        .with_context(|| format!("creating backup directory {}", pair.backup.display()))?;
    info!(game = %title, "backing up saves");
    let copied = mirror(&entries, &pair.backup)?;
    info!(game = %title, copied, "backup updated");
    Ok(SyncReport {
        direction: Some(Direction::OriginalToBackup),
        copied,
        conflict: false,
    })
}

/// Fixed-direction mirror from the backup folder back over the live saves.
pub fn restore_pair(pair: &SavePair, excludes: &GlobSet, title: &str) -> Result<SyncReport> {
    let entries = scanner::scan_dir(&pair.backup, excludes)?;
    if entries.is_empty() {
        info!(game = %title, path = %pair.backup.display(), "no backup found, skipping restore");
        return Ok(SyncReport::default());
    }
    fs::create_dir_all(&pair.original)
        .with_context(|| format!("creating save directory {}", pair.original.display()))?;
    warn!(game = %title, "restoring saves from backup, existing files will be overwritten");
    let copied = mirror(&entries, &pair.original)?;
    info!(game = %title, copied, "restore completed");
    Ok(SyncReport {
        direction: Some(Direction::BackupToOriginal),
        copied,
        conflict: false,
    })
}

/// True when the directory's current file set no longer matches its snapshot.
/// Without a snapshot the side counts as changed iff it holds any files.
fn changed_since(entries: &[FileEntry], snap: Option<&Snapshot>) -> bool {
    match snap {
        None => !entries.is_empty(),
        Some(snap) => {
            if entries.len() != snap.files.len() {
                return true;
            }
            entries
                .iter()
                .any(|e| snap.files.get(&e.rel) != Some(&e.mtime_ms))
        }
    }
}

/// Copy every entry to the same relative path under `dest_root`, overwriting
/// same-path files and keeping source modification times.
fn mirror(entries: &[FileEntry], dest_root: &Path) -> Result<usize> {
    let mut copied = 0usize;
    for entry in entries {
        let dest = dest_root.join(&entry.rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        fs::copy(&entry.abs, &dest).with_context(|| {
            format!("copying {} -> {}", entry.abs.display(), dest.display())
        })?;
        preserve_mtime(entry, &dest);
        copied += 1;
    }
    Ok(copied)
}

fn preserve_mtime(entry: &FileEntry, dest: &Path) {
    let mtime = UNIX_EPOCH + Duration::from_millis(entry.mtime_ms.max(0) as u64);
    let result = fs::File::options()
        .write(true)
        .open(dest)
        .and_then(|f| f.set_modified(mtime));
    if let Err(e) = result {
        warn!(path = %dest.display(), error = %e, "could not preserve modification time");
    }
}

fn load_lenient(dir: &Path) -> Option<Snapshot> {
    match snapshot::load(dir) {
        Ok(snap) => snap,
        Err(e) => {
            error!(error = %e, "ignoring unreadable snapshot");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_strategy_falls_back_to_backup() {
        assert_eq!(Strategy::from_config(None), Strategy::Backup);
        assert_eq!(Strategy::from_config(Some("bogus")), Strategy::Backup);
        assert_eq!(Strategy::from_config(Some(" SYNC ")), Strategy::Sync);
        assert_eq!(Strategy::from_config(Some("restore")), Strategy::Restore);
    }

    #[test]
    fn change_detection_compares_against_snapshot() {
        let entries = vec![FileEntry {
            rel: "a.sav".into(),
            abs: PathBuf::from("/x/a.sav"),
            mtime_ms: 100,
        }];
        let snap = Snapshot::from_entries(&entries);
        assert!(!changed_since(&entries, Some(&snap)));

        let touched = vec![FileEntry {
            rel: "a.sav".into(),
            abs: PathBuf::from("/x/a.sav"),
            mtime_ms: 101,
        }];
        assert!(changed_since(&touched, Some(&snap)));
        // Recorded file gone.
        assert!(changed_since(&[], Some(&snap)));
        // No record: only a populated side counts as changed.
        assert!(changed_since(&entries, None));
        assert!(!changed_since(&[], None));
    }
}
