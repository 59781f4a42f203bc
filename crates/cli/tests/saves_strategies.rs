use deckmate_core::config::AppConfig;
use deckmate_core::saves::{self, SavePair};
use deckmate_core::scanner;
use deckmate_core::snapshot::SNAPSHOT_FILE_NAME;
use globset::GlobSet;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
}

fn pair(root: &Path) -> SavePair {
    SavePair {
        original: root.join("original"),
        backup: root.join("backup"),
    }
}

fn no_excludes() -> GlobSet {
    scanner::build_globset(&[]).unwrap()
}

#[test]
fn backup_mirrors_into_the_backup_folder() {
    let temp = tempfile::tempdir().unwrap();
    let pair = pair(temp.path());
    write(&pair.original, "slot0.sav", "progress");
    write(&pair.original, "profiles/p1.dat", "profile");
    write(&pair.backup, "old.sav", "from before");

    let report = saves::backup_pair(&pair, &no_excludes(), "game").unwrap();

    assert_eq!(report.copied, 2);
    assert_eq!(
        fs::read_to_string(pair.backup.join("slot0.sav")).unwrap(),
        "progress"
    );
    assert_eq!(
        fs::read_to_string(pair.backup.join("profiles/p1.dat")).unwrap(),
        "profile"
    );
    // One-way mirroring keeps destination-only files and stays stateless.
    assert!(pair.backup.join("old.sav").exists());
    assert!(!pair.backup.join(SNAPSHOT_FILE_NAME).exists());
}

#[test]
fn backup_skips_a_missing_or_empty_source() {
    let temp = tempfile::tempdir().unwrap();
    let pair = pair(temp.path());

    let report = saves::backup_pair(&pair, &no_excludes(), "game").unwrap();
    assert_eq!(report.direction, None);
    assert!(!pair.backup.exists());

    fs::create_dir_all(&pair.original).unwrap();
    let report = saves::backup_pair(&pair, &no_excludes(), "game").unwrap();
    assert_eq!(report.direction, None);
}

#[test]
fn backup_does_not_carry_sync_snapshots_along() {
    let temp = tempfile::tempdir().unwrap();
    let pair = pair(temp.path());
    write(&pair.original, "slot0.sav", "progress");
    write(&pair.original, SNAPSHOT_FILE_NAME, "{}");

    let report = saves::backup_pair(&pair, &no_excludes(), "game").unwrap();

    assert_eq!(report.copied, 1);
    assert!(!pair.backup.join(SNAPSHOT_FILE_NAME).exists());
}

#[test]
fn restore_copies_the_backup_over_the_original() {
    let temp = tempfile::tempdir().unwrap();
    let pair = pair(temp.path());
    write(&pair.original, "slot0.sav", "corrupted");
    write(&pair.backup, "slot0.sav", "known good");

    let report = saves::restore_pair(&pair, &no_excludes(), "game").unwrap();

    assert_eq!(report.copied, 1);
    assert_eq!(
        fs::read_to_string(pair.original.join("slot0.sav")).unwrap(),
        "known good"
    );
}

#[test]
fn restore_skips_when_there_is_no_backup() {
    let temp = tempfile::tempdir().unwrap();
    let pair = pair(temp.path());
    write(&pair.original, "slot0.sav", "progress");

    let report = saves::restore_pair(&pair, &no_excludes(), "game").unwrap();

    assert_eq!(report.direction, None);
    assert_eq!(
        fs::read_to_string(pair.original.join("slot0.sav")).unwrap(),
        "progress"
    );
}

#[test]
fn excluded_globs_never_reach_the_backup() {
    let temp = tempfile::tempdir().unwrap();
    let pair = pair(temp.path());
    write(&pair.original, "slot0.sav", "progress");
    write(&pair.original, "crash.log", "noise");

    let excludes = scanner::build_globset(&["*.log".to_string()]).unwrap();
    let report = saves::backup_pair(&pair, &excludes, "game").unwrap();

    assert_eq!(report.copied, 1);
    assert!(!pair.backup.join("crash.log").exists());
}

#[test]
fn run_resolves_save_paths_from_manifests() {
    let temp = tempfile::tempdir().unwrap();
    let games = temp.path().join("games");
    let backups = temp.path().join("backups");
    let game_dir = games.join("My Game");
    write(&game_dir, "saves/slot0.sav", "progress");
    write(
        &game_dir,
        "launch_manifest.json",
        r#"{
            "title": "My Game",
            "target": "game.x86_64",
            "startIn": ".",
            "launchOptions": "",
            "savePath": "saves"
        }"#,
    );
    // A manifest without a savePath is skipped, not an error.
    write(
        &games.join("Other"),
        "launch_manifest.json",
        r#"{"title": "Other", "target": "other", "startIn": "."}"#,
    );

    let cfg = AppConfig::from_vars(HashMap::from([
        ("FREEGAMES_PATH".to_string(), games.display().to_string()),
        ("SAVESCOPY_PATH".to_string(), backups.display().to_string()),
    ]));
    saves::run(&cfg, None).unwrap();

    // Default strategy is backup; the folder name is the sanitized title.
    assert_eq!(
        fs::read_to_string(backups.join("My_Game/slot0.sav")).unwrap(),
        "progress"
    );
    assert!(!backups.join("Other").exists());
}

#[test]
fn run_honors_the_strategy_override() {
    let temp = tempfile::tempdir().unwrap();
    let games = temp.path().join("games");
    let backups = temp.path().join("backups");
    let game_dir = games.join("Quest");
    write(
        &game_dir,
        "launch_manifest.json",
        r#"{"title": "Quest", "target": "quest", "startIn": ".", "savePath": "saves"}"#,
    );
    write(&backups.join("Quest"), "slot0.sav", "restored");

    let cfg = AppConfig::from_vars(HashMap::from([
        ("FREEGAMES_PATH".to_string(), games.display().to_string()),
        ("SAVESCOPY_PATH".to_string(), backups.display().to_string()),
        ("SAVESCOPY_STRATEGY".to_string(), "backup".to_string()),
    ]));
    saves::run(&cfg, Some("restore")).unwrap();

    assert_eq!(
        fs::read_to_string(game_dir.join("saves/slot0.sav")).unwrap(),
        "restored"
    );
}
