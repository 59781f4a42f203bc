//! Keeps configured directory symlinks in place.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::paths;

#[derive(Debug, Clone, Deserialize)]
pub struct SymlinkSpec {
    pub src: String,
    pub tgt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymlinkList {
    pub symlinks: Vec<SymlinkSpec>,
}

/// Ensure every configured target is a symlink to its source directory.
/// Problems with one entry do not stop the rest.
pub fn run(cfg: &AppConfig) -> Result<()> {
    let list_path = Path::new(&cfg.symlinks_path);
    if !list_path.is_file() {
        warn!(path = %list_path.display(), "symlink list not found, skipping");
        return Ok(());
    }
    let data =
        fs::read(list_path).with_context(|| format!("reading {}", list_path.display()))?;
    let list: SymlinkList = serde_json::from_slice(&data)
        .with_context(|| format!("parsing {}", list_path.display()))?;

    for spec in &list.symlinks {
        let src = paths::expand(&spec.src);
        let tgt = paths::expand(&spec.tgt);
        if let Err(e) = ensure_link(&src, &tgt) {
            error!(src = %src.display(), tgt = %tgt.display(), error = %e, "symlink failed");
        }
    }
    Ok(())
}

pub fn ensure_link(src: &Path, tgt: &Path) -> Result<()> {
    if !src.is_dir() {
        error!(path = %src.display(), "source directory does not exist");
        return Ok(());
    }

    if tgt.is_symlink() {
        let points_at_src = match (fs::canonicalize(tgt), fs::canonicalize(src)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if points_at_src {
            info!(tgt = %tgt.display(), src = %src.display(), "already linked");
        } else {
            error!(tgt = %tgt.display(), "target is already a symlink to a different location");
        }
        return Ok(());
    }

    if tgt.exists() {
        if tgt.is_dir() {
            let empty = fs::read_dir(tgt)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if !empty {
                error!(tgt = %tgt.display(), "target directory is not empty");
                return Ok(());
            }
            fs::remove_dir(tgt)
                .with_context(|| format!("removing empty directory {}", tgt.display()))?;
        } else {
            error!(tgt = %tgt.display(), "target exists and is not a directory");
            return Ok(());
        }
    }

    symlink(src, tgt)
        .with_context(|| format!("linking {} -> {}", tgt.display(), src.display()))?;
    info!(tgt = %tgt.display(), src = %src.display(), "symlink created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_and_recognizes_links() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("roms");
        let tgt = temp.path().join("roms-link");
        fs::create_dir_all(&src).unwrap();

        ensure_link(&src, &tgt).unwrap();
        assert!(tgt.is_symlink());
        assert_eq!(fs::canonicalize(&tgt).unwrap(), fs::canonicalize(&src).unwrap());

        // Second run leaves the existing link alone.
        ensure_link(&src, &tgt).unwrap();
        assert!(tgt.is_symlink());
    }

    #[test]
    fn replaces_an_empty_directory() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("saves");
        let tgt = temp.path().join("saves-mount");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&tgt).unwrap();

        ensure_link(&src, &tgt).unwrap();
        assert!(tgt.is_symlink());
    }

    #[test]
    fn refuses_a_populated_directory() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("saves");
        let tgt = temp.path().join("occupied");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&tgt).unwrap();
        fs::write(tgt.join("keep.txt"), b"x").unwrap();

        ensure_link(&src, &tgt).unwrap();
        assert!(!tgt.is_symlink());
        assert!(tgt.join("keep.txt").exists());
    }
}
