//! Rewrites emulator and app configuration files in place.
//!
//! Driven by a JSON descriptor mapping app names to files and replacement
//! rules. Paths, patterns, and values may reference `${VAR}` placeholders
//! resolved from the loaded config map, then the process environment; file
//! entries whose paths resolve no placeholder at all are dropped, since they
//! are templates for machines where those variables are set.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

use crate::config::AppConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplacementKind {
    #[default]
    Text,
    Hexadecimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Replacement {
    #[serde(default = "unnamed")]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: ReplacementKind,
    pub pattern: String,
    pub value: String,
}

/// `paths` accepts a single string or a list in the descriptor.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PathList {
    One(String),
    Many(Vec<String>),
}

impl PathList {
    fn iter(&self) -> impl Iterator<Item = &str> {
        match self {
            PathList::One(s) => std::slice::from_ref(s).iter(),
            PathList::Many(v) => v.iter(),
        }
        .map(|s| s.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileRule {
    pub paths: PathList,
    pub replacements: Vec<Replacement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppRules {
    #[serde(default)]
    pub files: Vec<FileRule>,
}

struct ResolvedFile {
    paths: Vec<String>,
    replacements: Vec<Replacement>,
}

fn unnamed() -> String {
    "unnamed".to_string()
}

/// Substitute `${VAR}` placeholders from the config map, then the
/// environment. Unknown variables are left in place.
pub fn resolve_vars(text: &str, vars: &HashMap<String, String>) -> String {
    let re = Regex::new(r"\$\{(\w+)\}").unwrap();
    re.replace_all(text, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        vars.get(&name.to_uppercase())
            .cloned()
            .or_else(|| std::env::var(name).ok())
            .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

/// Apply all configured rewrites.
pub fn run(cfg: &AppConfig) -> Result<()> {
    let descriptor = Path::new(&cfg.configurer_path);
    if !descriptor.is_file() {
        warn!(path = %descriptor.display(), "configurer descriptor not found, skipping");
        return Ok(());
    }
    let data = fs::read(descriptor)
        .with_context(|| format!("reading {}", descriptor.display()))?;
    let apps: HashMap<String, AppRules> = serde_json::from_slice(&data)
        .with_context(|| format!("parsing {}", descriptor.display()))?;

    for (app, rules) in &apps {
        let files = resolve_rules(rules, &cfg.vars);
        if files.is_empty() {
            continue;
        }
        info!(app = %app, "configuring");
        for file in &files {
            for path in &file.paths {
                modify_file(Path::new(path), &file.replacements);
            }
        }
    }
    Ok(())
}

fn resolve_rules(rules: &AppRules, vars: &HashMap<String, String>) -> Vec<ResolvedFile> {
    let mut out = Vec::new();
    for file in &rules.files {
        // Keep only paths where a placeholder actually resolved.
        let paths: Vec<String> = file
            .paths
            .iter()
            .filter_map(|raw| {
                let resolved = resolve_vars(raw, vars);
                (resolved != raw).then_some(resolved)
            })
            .collect();
        if paths.is_empty() {
            continue;
        }
        let replacements: Vec<Replacement> = file
            .replacements
            .iter()
            .map(|r| Replacement {
                name: r.name.clone(),
                kind: r.kind,
                pattern: resolve_vars(&r.pattern, vars),
                value: resolve_vars(&r.value, vars),
            })
            .collect();
        if replacements.is_empty() {
            continue;
        }
        out.push(ResolvedFile {
            paths,
            replacements,
        });
    }
    out
}

fn modify_file(path: &Path, replacements: &[Replacement]) {
    if !path.exists() {
        info!(path = %path.display(), "file does not exist");
        return;
    }
    let text_reps: Vec<&Replacement> = replacements
        .iter()
        .filter(|r| r.kind == ReplacementKind::Text)
        .collect();
    let hex_reps: Vec<&Replacement> = replacements
        .iter()
        .filter(|r| r.kind == ReplacementKind::Hexadecimal)
        .collect();

    if !text_reps.is_empty() {
        match fs::read_to_string(path) {
            Ok(content) => {
                let (content, modified) = apply_text_replacements(content, &text_reps);
                if modified {
                    if let Err(e) = fs::write(path, content) {
                        error!(path = %path.display(), error = %e, "could not write file");
                    }
                }
            }
            Err(e) => error!(path = %path.display(), error = %e, "could not read file as text"),
        }
    }

    if !hex_reps.is_empty() {
        match fs::read(path) {
            Ok(mut content) => {
                let modified = apply_hex_replacements(&mut content, &hex_reps);
                if modified {
                    if let Err(e) = fs::write(path, content) {
                        error!(path = %path.display(), error = %e, "could not write file");
                    }
                }
            }
            Err(e) => error!(path = %path.display(), error = %e, "could not read file"),
        }
    }
}

fn apply_text_replacements(mut content: String, replacements: &[&Replacement]) -> (String, bool) {
    let mut modified = false;
    for rep in replacements {
        let re = match Regex::new(&rep.pattern) {
            Ok(re) => re,
            Err(e) => {
                error!(replacement = %rep.name, error = %e, "invalid pattern");
                continue;
            }
        };
        if re.is_match(&content) {
            content = re.replace_all(&content, rep.value.as_str()).into_owned();
            info!(replacement = %rep.name, value = %rep.value, "applied");
            modified = true;
        }
    }
    (content, modified)
}

fn apply_hex_replacements(content: &mut Vec<u8>, replacements: &[&Replacement]) -> bool {
    let mut modified = false;
    for rep in replacements {
        let applied = if rep.pattern.contains('?') {
            apply_wildcard_bytes(content, &rep.pattern, &rep.value)
        } else {
            apply_exact_bytes(content, rep.pattern.as_bytes(), &encode_value(&rep.value))
        };
        if applied {
            info!(replacement = %rep.name, value = %rep.value, "applied");
            modified = true;
        }
    }
    modified
}

/// Replace the first window matching `prefix ? suffix`, where `?` stands for
/// exactly one arbitrary byte.
fn apply_wildcard_bytes(content: &mut Vec<u8>, pattern: &str, value: &str) -> bool {
    let prefix = pattern.split('?').next().unwrap_or("").as_bytes();
    let suffix = pattern.rsplit('?').next().unwrap_or("").as_bytes();
    let window = prefix.len() + 1 + suffix.len();
    if content.len() < window {
        return false;
    }
    for i in 0..=content.len() - window {
        if content[i..].starts_with(prefix)
            && content[i + prefix.len() + 1..].starts_with(suffix)
        {
            let replacement = encode_value(value);
            content.splice(i..i + window, replacement);
            return true;
        }
    }
    false
}

fn apply_exact_bytes(content: &mut Vec<u8>, pattern: &[u8], value: &[u8]) -> bool {
    if pattern.is_empty() {
        return false;
    }
    let mut modified = false;
    let mut i = 0;
    while i + pattern.len() <= content.len() {
        if &content[i..i + pattern.len()] == pattern {
            content.splice(i..i + pattern.len(), value.iter().copied());
            i += value.len();
            modified = true;
        } else {
            i += 1;
        }
    }
    modified
}

/// Digits in the value encode single raw bytes; everything else is ASCII.
fn encode_value(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for c in value.chars() {
        if let Some(d) = c.to_digit(10) {
            out.push(d as u8);
        } else {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
    }
    out
}
