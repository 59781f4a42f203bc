//! Picks the most plausible main executable inside a game directory.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::manifest;

const MAX_DEPTH: usize = 3;

/// Machine classes in order of preference for a Linux handheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ExeClass {
    X86_64,
    X86,
    Other,
}

#[derive(Debug)]
struct Candidate {
    path: PathBuf,
    depth: usize,
    class: ExeClass,
}

/// Find the best launch target under `game_dir`, or `None` when the
/// directory holds nothing executable.
pub fn find_target(game_dir: &Path) -> Result<Option<PathBuf>> {
    let root = manifest::effective_root(game_dir);
    let candidates = collect_candidates(&root)?;
    Ok(choose(&root, candidates))
}

fn collect_candidates(root: &Path) -> Result<Vec<Candidate>> {
    let mut found = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(MAX_DEPTH)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()));

    for entry in walker {
        let entry =
            entry.with_context(|| format!("walking game directory {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if in_runtime_dir(path) {
            continue;
        }
        let meta = match fs::metadata(path) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if meta.permissions().mode() & 0o111 == 0 {
            continue;
        }
        found.push(Candidate {
            path: path.to_path_buf(),
            depth: entry.depth(),
            class: classify(path),
        });
    }
    Ok(found)
}

/// Shallowest hits first; among those the best machine class; name
/// similarity against the folder breaks remaining ties.
fn choose(root: &Path, candidates: Vec<Candidate>) -> Option<PathBuf> {
    let min_depth = candidates.iter().map(|c| c.depth).min()?;
    let pool: Vec<&Candidate> = candidates.iter().filter(|c| c.depth == min_depth).collect();
    let best_class = pool.iter().map(|c| c.class).min()?;

    let folder = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    pool.into_iter()
        .filter(|c| c.class == best_class)
        .max_by(|a, b| {
            let sa = name_similarity(&folder, &stem(&a.path));
            let sb = name_similarity(&folder, &stem(&b.path));
            sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|c| c.path.clone())
}

/// Classify an executable file by its ELF machine field; anything that is
/// not a recognized ELF (scripts, launchers) falls into `Other`.
fn classify(path: &Path) -> ExeClass {
    let mut header = [0u8; 20];
    let read = fs::File::open(path).and_then(|mut f| f.read(&mut header));
    match read {
        Ok(n) if n >= 20 && header[..4] == [0x7f, b'E', b'L', b'F'] => {
            match u16::from_le_bytes([header[18], header[19]]) {
                0x3e => ExeClass::X86_64,
                0x03 => ExeClass::X86,
                _ => ExeClass::Other,
            }
        }
        _ => ExeClass::Other,
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// Bundled runtimes ship their own executables that are never the game.
fn in_runtime_dir(path: &Path) -> bool {
    path.parent()
        .map(|dir| {
            dir.components().any(|c| {
                matches!(c.as_os_str().to_str(), Some("java") | Some("jre") | Some("lib"))
            })
        })
        .unwrap_or(false)
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Jaccard similarity over lowercase character bigrams.
fn name_similarity(a: &str, b: &str) -> f64 {
    let sa = bigrams(a);
    let sb = bigrams(b);
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    let inter = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    if union == 0 {
        1.0
    } else {
        inter as f64 / union as f64
    }
}

fn bigrams(s: &str) -> HashSet<(char, char)> {
    let chars: Vec<char> = s.to_lowercase().chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elf_bytes(machine: u16) -> Vec<u8> {
        let mut bytes = vec![0u8; 32];
        bytes[..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        bytes[4] = 2; // 64-bit
        bytes[5] = 1; // little endian
        bytes[16] = 2; // ET_EXEC
        bytes[18..20].copy_from_slice(&machine.to_le_bytes());
        bytes
    }

    fn write_exe(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, bytes).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn prefers_x86_64_over_scripts_at_the_same_depth() {
        let temp = tempfile::tempdir().unwrap();
        write_exe(temp.path(), "run.sh", b"#!/bin/sh\n");
        let game = write_exe(temp.path(), "game.x86_64", &elf_bytes(0x3e));
        assert_eq!(find_target(temp.path()).unwrap(), Some(game));
    }

    #[test]
    fn shallower_executables_win() {
        let temp = tempfile::tempdir().unwrap();
        let launcher = write_exe(temp.path(), "start.sh", b"#!/bin/sh\n");
        // A richer binary deeper down still loses to the depth-1 hit, and a
        // second file at depth 1 forces the wrapper descent to stop here.
        fs::write(temp.path().join("readme.txt"), b"x").unwrap();
        let sub = temp.path().join("bin");
        fs::create_dir_all(&sub).unwrap();
        write_exe(&sub, "game.x86_64", &elf_bytes(0x3e));
        assert_eq!(find_target(temp.path()).unwrap(), Some(launcher));
    }

    #[test]
    fn skips_bundled_runtime_directories() {
        let temp = tempfile::tempdir().unwrap();
        let jre = temp.path().join("jre");
        fs::create_dir_all(&jre).unwrap();
        write_exe(&jre, "java", &elf_bytes(0x3e));
        assert_eq!(find_target(temp.path()).unwrap(), None);
    }

    #[test]
    fn similar_names_break_ties() {
        let temp = tempfile::tempdir().unwrap();
        let game_dir = temp.path().join("SuperQuest");
        fs::create_dir_all(&game_dir).unwrap();
        write_exe(&game_dir, "crashhandler", &elf_bytes(0x3e));
        let main = write_exe(&game_dir, "superquest", &elf_bytes(0x3e));
        assert_eq!(find_target(&game_dir).unwrap(), Some(main));
    }
}
