//! Applies file replacements and binary patches to installed games.
//!
//! Patch sets live under the patches directory as `patch.json` files, one
//! array of entries per set, with the payload files stored alongside.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::config::AppConfig;
use crate::paths;

pub const PATCH_FILE_NAME: &str = "patch.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchMethod {
    Replace,
    Patch,
}

/// One file to fix up inside an installed game.
#[derive(Debug, Clone, Deserialize)]
pub struct PatchEntry {
    /// Payload file name, relative to the patch set's folder.
    pub file: String,
    /// Target path, relative to a Steam library's `common` root.
    pub target: String,
    pub method: PatchMethod,
    /// Expected digest of the pristine target; mismatches are skipped.
    #[serde(default)]
    pub target_hash: Option<String>,
    /// Digest of the target after a successful patch.
    #[serde(default)]
    pub patched_hash: Option<String>,
}

enum TargetState {
    Ready,
    AlreadyPatched,
    Mismatch(String),
}

/// Walk the patches directory and apply every patch set found.
pub fn run(cfg: &AppConfig) -> Result<()> {
    let Some(patches_dir) = cfg.patches_dir() else {
        warn!("patches directory not configured, skipping patches");
        return Ok(());
    };
    if !patches_dir.is_dir() {
        warn!(path = %patches_dir.display(), "patches directory does not exist, skipping patches");
        return Ok(());
    }

    let libraries = expand_library_paths(&cfg.steam_libraries);
    info!(path = %patches_dir.display(), "looking for patches");

    let mut sets = 0usize;
    for entry in WalkDir::new(&patches_dir) {
        let entry = entry
            .with_context(|| format!("walking patches directory {}", patches_dir.display()))?;
        if !entry.file_type().is_file() || entry.file_name() != PATCH_FILE_NAME {
            continue;
        }
        let set_path = entry.path();
        let set_dir = set_path.parent().unwrap_or_else(|| Path::new("."));
        info!(set = %set_dir.display(), "processing patch set");

        let entries: Vec<PatchEntry> = match fs::read(set_path)
            .map_err(anyhow::Error::from)
            .and_then(|data| serde_json::from_slice(&data).map_err(anyhow::Error::from))
        {
            Ok(entries) => entries,
            Err(e) => {
                error!(set = %set_path.display(), error = %e, "unreadable patch set");
                continue;
            }
        };

        for patch in &entries {
            if let Err(e) = process_entry(patch, set_dir, &libraries, cfg) {
                error!(target = %patch.target, error = %e, "patch failed");
            }
        }
        sets += 1;
    }

    if sets == 0 {
        info!("no {PATCH_FILE_NAME} files found");
    }
    Ok(())
}

fn process_entry(
    patch: &PatchEntry,
    set_dir: &Path,
    libraries: &[PathBuf],
    cfg: &AppConfig,
) -> Result<()> {
    let source = set_dir.join(&patch.file);
    if !source.exists() {
        error!(file = %source.display(), "patch payload does not exist");
        return Ok(());
    }

    // First library holding the target wins.
    let Some(target) = libraries
        .iter()
        .map(|lib| lib.join(&patch.target))
        .find(|t| t.exists())
    else {
        info!(target = %patch.target, "target not found in any library");
        return Ok(());
    };

    match target_state(&target, patch)? {
        TargetState::AlreadyPatched => {
            info!(target = %file_name(&target), "already patched");
            Ok(())
        }
        TargetState::Mismatch(actual) => {
            warn!(
                target = %file_name(&target),
                expected = patch.target_hash.as_deref().unwrap_or(""),
                actual = %actual,
                "digest mismatch, skipping"
            );
            Ok(())
        }
        TargetState::Ready => match patch.method {
            PatchMethod::Replace => apply_replacement(&source, &target),
            PatchMethod::Patch => apply_flips_patch(patch, &source, &target, cfg),
        },
    }
}

fn target_state(target: &Path, patch: &PatchEntry) -> Result<TargetState> {
    let actual = full_hash(target)?;
    if patch.patched_hash.as_deref() == Some(actual.as_str()) {
        return Ok(TargetState::AlreadyPatched);
    }
    match &patch.target_hash {
        Some(expected) if expected != &actual => Ok(TargetState::Mismatch(actual)),
        _ => Ok(TargetState::Ready),
    }
}

/// Copy the payload over the target, keeping a one-time `.backup` of the
/// pristine file. A diverged target with an existing backup is refused
/// unless it already equals the payload.
fn apply_replacement(source: &Path, target: &Path) -> Result<()> {
    let backup = backup_path(target);
    if backup.exists() {
        if full_hash(target)? != full_hash(&backup)? {
            if full_hash(target)? == full_hash(source)? {
                info!(target = %file_name(target), "already replaced");
            } else {
                error!(
                    target = %file_name(target),
                    "backup exists but target differs from the payload, refusing"
                );
            }
            return Ok(());
        }
    } else {
        fs::copy(target, &backup)
            .with_context(|| format!("backing up {}", target.display()))?;
    }

    fs::copy(source, target)
        .with_context(|| format!("replacing {}", target.display()))?;
    info!(target = %file_name(target), "replaced");
    Ok(())
}

/// Run the external `flips` patcher into a scratch file and atomically move
/// the result over the target.
fn apply_flips_patch(
    patch: &PatchEntry,
    source: &Path,
    target: &Path,
    cfg: &AppConfig,
) -> Result<()> {
    let backup = backup_path(target);
    if backup.exists() {
        if full_hash(target)? != full_hash(&backup)? {
            if patch.patched_hash.as_deref() == Some(full_hash(target)?.as_str()) {
                info!(target = %file_name(target), "already patched");
            } else {
                error!(
                    target = %file_name(target),
                    "backup exists but target differs from the patch, refusing"
                );
            }
            return Ok(());
        }
    } else {
        fs::copy(target, &backup)
            .with_context(|| format!("backing up {}", target.display()))?;
    }

    let patched = {
        let mut s = target.as_os_str().to_os_string();
        s.push(".patched");
        PathBuf::from(s)
    };
    let output = Command::new(&cfg.flips_path)
        .arg("-a")
        .arg(source)
        .arg(target)
        .arg(&patched)
        .output()
        .with_context(|| format!("running {}", cfg.flips_path))?;

    if output.status.success() {
        fs::rename(&patched, target)
            .with_context(|| format!("installing patched {}", target.display()))?;
        info!(target = %file_name(target), "patched");
    } else {
        let _ = fs::remove_file(&patched);
        error!(
            target = %file_name(target),
            stderr = %String::from_utf8_lossy(&output.stderr),
            "flips failed"
        );
    }
    Ok(())
}

/// Expand configured Steam library patterns into existing directories; a
/// single `*` component matches one directory level.
pub fn expand_library_paths(patterns: &[String]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for pattern in patterns {
        let expanded = paths::expand(pattern);
        for dir in expand_wildcard(&expanded) {
            if dir.is_dir() {
                out.push(dir);
            }
        }
    }
    out
}

fn expand_wildcard(pattern: &Path) -> Vec<PathBuf> {
    let Some(star) = pattern
        .components()
        .position(|c| c.as_os_str() == "*")
    else {
        return vec![pattern.to_path_buf()];
    };

    let prefix: PathBuf = pattern.components().take(star).collect();
    let suffix: PathBuf = pattern.components().skip(star + 1).collect();
    let Ok(read) = fs::read_dir(&prefix) else {
        return Vec::new();
    };
    read.flatten()
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .flat_map(|e| expand_wildcard(&e.path().join(&suffix)))
        .collect()
}

pub fn full_hash(path: &Path) -> Result<String> {
    let mut file =
        fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

fn backup_path(target: &Path) -> PathBuf {
    let mut s = target.as_os_str().to_os_string();
    s.push(".backup");
    PathBuf::from(s)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacement_backs_up_then_overwrites() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("game.bin");
        let source = temp.path().join("payload.bin");
        fs::write(&target, b"original").unwrap();
        fs::write(&source, b"patched").unwrap();

        apply_replacement(&source, &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"patched");
        assert_eq!(fs::read(backup_path(&target)).unwrap(), b"original");

        // Re-running against the already-replaced target is a no-op.
        apply_replacement(&source, &target).unwrap();
        assert_eq!(fs::read(backup_path(&target)).unwrap(), b"original");
    }

    #[test]
    fn diverged_target_with_backup_is_refused() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("game.bin");
        let source = temp.path().join("payload.bin");
        fs::write(&target, b"unexpected edit").unwrap();
        fs::write(&source, b"patched").unwrap();
        fs::write(backup_path(&target), b"original").unwrap();

        apply_replacement(&source, &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"unexpected edit");
    }

    #[test]
    fn already_patched_target_is_detected() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("game.bin");
        fs::write(&target, b"patched").unwrap();
        let patch = PatchEntry {
            file: "payload.bin".into(),
            target: "game.bin".into(),
            method: PatchMethod::Replace,
            target_hash: Some("0".repeat(64)),
            patched_hash: Some(full_hash(&target).unwrap()),
        };
        assert!(matches!(
            target_state(&target, &patch).unwrap(),
            TargetState::AlreadyPatched
        ));
    }

    #[test]
    fn wildcard_expands_one_directory_level() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp.path().join("sd1/steamapps/common")).unwrap();
        fs::create_dir_all(temp.path().join("sd2/steamapps/common")).unwrap();
        let pattern = format!("{}/*/steamapps/common", temp.path().display());
        let mut found = expand_library_paths(&[pattern]);
        found.sort();
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("sd1/steamapps/common"));
    }
}
