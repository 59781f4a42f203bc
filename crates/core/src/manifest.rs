//! Launch manifests: discovery, creation, and the aggregate import file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::config::AppConfig;
use crate::detector;
use crate::paths;

pub const MANIFEST_FILE_NAME: &str = "launch_manifest.json";
pub const AGGREGATE_FILE_NAME: &str = "manifests.json";

/// One game's launch description, stored next to the game files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub title: String,
    pub target: String,
    pub start_in: String,
    #[serde(default)]
    pub launch_options: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_path: Option<String>,
}

/// All `launch_manifest.json` files under `games_dir`, any depth.
pub fn find_manifests(games_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(games_dir) {
        let entry = entry
            .with_context(|| format!("walking games directory {}", games_dir.display()))?;
        if entry.file_type().is_file() && entry.file_name() == MANIFEST_FILE_NAME {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

pub fn load(path: &Path) -> Result<Manifest> {
    let data =
        fs::read(path).with_context(|| format!("reading manifest {}", path.display()))?;
    serde_json::from_slice(&data)
        .with_context(|| format!("parsing manifest {}", path.display()))
}

/// Load a manifest with `target`/`startIn` absolutized against its directory.
pub fn load_adjusted(path: &Path) -> Result<Manifest> {
    let mut m = load(path)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    m.target = absolutize(dir, &m.target);
    m.start_in = absolutize(dir, &m.start_in);
    Ok(m)
}

fn absolutize(dir: &Path, value: &str) -> String {
    let p = Path::new(value);
    if p.is_absolute() {
        value.to_string()
    } else {
        paths::normalize(&dir.join(p)).to_string_lossy().into_owned()
    }
}

pub fn write(path: &Path, manifest: &Manifest) -> Result<()> {
    let data = serde_json::to_vec_pretty(manifest).expect("manifest serializes");
    fs::write(path, data)
        .with_context(|| format!("writing manifest {}", path.display()))?;
    info!(game = %manifest.title, "manifest created");
    Ok(())
}

/// The directory the game actually lives in: descend through chains of
/// single-subdirectory wrappers left behind by archive extraction.
pub fn effective_root(game_dir: &Path) -> PathBuf {
    let mut dirs = Vec::new();
    let mut has_files = false;
    if let Ok(read) = fs::read_dir(game_dir) {
        for entry in read.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || name == MANIFEST_FILE_NAME {
                continue;
            }
            match entry.file_type() {
                Ok(t) if t.is_dir() => dirs.push(entry.path()),
                Ok(t) if t.is_file() => has_files = true,
                _ => {}
            }
        }
    }
    if dirs.len() == 1 && !has_files {
        effective_root(&dirs[0])
    } else {
        game_dir.to_path_buf()
    }
}

fn title_for(game_dir: &Path) -> String {
    effective_root(game_dir)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "game".to_string())
}

/// Detect the game's executable and write a fresh manifest, unless one
/// already exists.
pub fn create_manifest(game_dir: &Path) -> Result<()> {
    let manifest_path = game_dir.join(MANIFEST_FILE_NAME);
    if manifest_path.exists() {
        return Ok(());
    }
    let Some(target) = detector::find_target(game_dir)? else {
        info!(game = %title_for(game_dir), "no executable found");
        return Ok(());
    };
    info!(game = %title_for(game_dir), target = %target.display(), "executable detected");

    let rel_target = target
        .strip_prefix(game_dir)
        .unwrap_or(&target)
        .to_path_buf();
    let start_in = rel_target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".to_string());

    let manifest = Manifest {
        title: title_for(game_dir),
        target: rel_target.to_string_lossy().into_owned(),
        start_in,
        launch_options: String::new(),
        save_path: None,
    };
    write(&manifest_path, &manifest)
}

/// Combine every manifest under the games root into `manifests.json` with
/// absolute launch paths, ready for a Steam import tool.
pub fn aggregate(games_dir: &Path) -> Result<()> {
    let mut combined = Vec::new();
    for path in find_manifests(games_dir)? {
        match load_adjusted(&path) {
            Ok(m) => {
                info!(game = %m.title, "aggregated");
                combined.push(m);
            }
            Err(e) => error!(manifest = %path.display(), error = %e, "skipping bad manifest"),
        }
    }
    let out = games_dir.join(AGGREGATE_FILE_NAME);
    let data = serde_json::to_vec_pretty(&combined).expect("manifests serialize");
    fs::write(&out, data)
        .with_context(|| format!("writing aggregate manifest {}", out.display()))?;
    info!(path = %out.display(), "aggregate manifest written");
    Ok(())
}

/// Create missing manifests for every game folder, then rebuild the
/// aggregate import file.
pub fn run(cfg: &AppConfig) -> Result<()> {
    let Some(games_dir) = cfg.games_dir() else {
        warn!("games directory not configured, skipping manifests");
        return Ok(());
    };
    if !games_dir.is_dir() {
        warn!(path = %games_dir.display(), "games directory does not exist, skipping manifests");
        return Ok(());
    }

    info!(path = %games_dir.display(), "looking for games");
    for entry in fs::read_dir(&games_dir)
        .with_context(|| format!("listing games directory {}", games_dir.display()))?
        .flatten()
    {
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            if let Err(e) = create_manifest(&entry.path()) {
                error!(game = %entry.path().display(), error = %e, "manifest creation failed");
            }
        }
    }
    aggregate(&games_dir)
}
