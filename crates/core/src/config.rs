//! Toolkit configuration, loaded from a flat `KEY=VALUE` INI file.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::paths;

pub const GAMES_DIR_KEY: &str = "FREEGAMES_PATH";
pub const SAVES_ROOT_KEY: &str = "SAVESCOPY_PATH";
pub const SAVES_STRATEGY_KEY: &str = "SAVESCOPY_STRATEGY";
pub const SAVES_EXCLUDE_KEY: &str = "SAVESCOPY_EXCLUDE";
pub const PATCHES_DIR_KEY: &str = "PATCHES_PATH";
pub const STEAM_LIBRARIES_KEY: &str = "STEAM_LIBRARY_PATHS";
pub const FLIPS_PATH_KEY: &str = "FLIPS_PATH";
pub const CONFIGURER_PATH_KEY: &str = "CONFIGURER_PATH";
pub const SYMLINKS_PATH_KEY: &str = "SYMLINKS_PATH";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub games_dir: Option<String>,
    pub saves_root: Option<String>,
    pub saves_strategy: Option<String>,
    /// Globs excluded from save enumeration.
    pub saves_exclude: Vec<String>,
    pub patches_dir: Option<String>,
    /// Steam library `common` roots; `*` components are expanded.
    pub steam_libraries: Vec<String>,
    pub flips_path: String,
    pub configurer_path: String,
    pub symlinks_path: String,
    /// The full key/value map, for `${VAR}` resolution in descriptors.
    pub vars: HashMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig::from_vars(HashMap::new())
    }
}

impl AppConfig {
    pub fn from_vars(raw: HashMap<String, String>) -> Self {
        let vars: HashMap<String, String> = raw
            .into_iter()
            .map(|(k, v)| (k.to_uppercase(), v.trim().to_string()))
            .collect();
        let get = |key: &str| vars.get(key).filter(|v| !v.is_empty()).cloned();

        AppConfig {
            games_dir: get(GAMES_DIR_KEY),
            saves_root: get(SAVES_ROOT_KEY),
            saves_strategy: get(SAVES_STRATEGY_KEY),
            saves_exclude: get(SAVES_EXCLUDE_KEY)
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            patches_dir: get(PATCHES_DIR_KEY),
            steam_libraries: get(STEAM_LIBRARIES_KEY)
                .map(|v| split_list(&v))
                .unwrap_or_else(default_steam_libraries),
            flips_path: get(FLIPS_PATH_KEY).unwrap_or_else(|| "flips".to_string()),
            configurer_path: get(CONFIGURER_PATH_KEY)
                .unwrap_or_else(|| "config/configurer.json".to_string()),
            symlinks_path: get(SYMLINKS_PATH_KEY)
                .unwrap_or_else(|| "symlinks.json".to_string()),
            vars,
        }
    }

    pub fn games_dir(&self) -> Option<PathBuf> {
        self.games_dir.as_deref().map(paths::expand)
    }

    pub fn saves_root(&self) -> Option<PathBuf> {
        self.saves_root.as_deref().map(paths::expand)
    }

    pub fn patches_dir(&self) -> Option<PathBuf> {
        self.patches_dir.as_deref().map(paths::expand)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn default_steam_libraries() -> Vec<String> {
    vec![
        "~/.steam/steam/steamapps/common".to_string(),
        "/run/media/deck/*/steamapps/common".to_string(),
    ]
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings =
            settings.add_source(config::File::with_name(p).format(config::FileFormat::Ini));
    } else {
        settings = settings.add_source(
            config::File::with_name("config/default")
                .format(config::FileFormat::Ini)
                .required(false),
        );
    }
    let cfg = settings.build()?;
    let raw: HashMap<String, String> = cfg.try_deserialize()?;
    Ok(AppConfig::from_vars(raw))
}
