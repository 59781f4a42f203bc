//! Path expansion and game-title sanitizing helpers.

use regex::Regex;
use std::path::{Component, Path, PathBuf};

const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Expand `~`, `$VAR` and `${VAR}` references in a path string.
/// Unknown variables are left in place.
pub fn expand(path: &str) -> PathBuf {
    let mut s = path.to_string();
    if s == "~" || s.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            s = format!("{}{}", home, &s[1..]);
        }
    }
    let re = Regex::new(r"\$\{(\w+)\}|\$(\w+)").unwrap();
    let expanded = re.replace_all(&s, |caps: &regex::Captures<'_>| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
    });
    PathBuf::from(expanded.into_owned())
}

/// Resolve a manifest's save path: expand variables, then interpret relative
/// paths against the manifest's own directory.
pub fn resolve_save_path(raw: &str, manifest_path: &Path) -> Option<PathBuf> {
    if raw.trim().is_empty() {
        return None;
    }
    let expanded = expand(raw.trim());
    let resolved = if expanded.is_absolute() {
        expanded
    } else {
        let manifest_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
        manifest_dir.join(expanded)
    };
    Some(normalize(&resolved))
}

/// Collapse `.` and `..` components without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(comp.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Turn a game title into a filesystem-safe directory name.
pub fn sanitize_title(title: &str) -> String {
    let mut name: String = title
        .trim()
        .chars()
        .map(|c| {
            if "<>:\"/\\|?*".contains(c) || (c as u32) < 32 {
                '_'
            } else {
                c
            }
        })
        .collect();
    let ws = Regex::new(r"\s+").unwrap();
    name = ws.replace_all(&name, "_").into_owned();
    name = name.trim_end_matches(&['.', ' '][..]).to_string();
    if name.is_empty() {
        name = "game".to_string();
    }
    if WINDOWS_RESERVED_NAMES.contains(&name.to_uppercase().as_str()) {
        name = format!("{name}_game");
    }
    if name.chars().count() > 100 {
        name = name.chars().take(100).collect();
    }
    name
}
