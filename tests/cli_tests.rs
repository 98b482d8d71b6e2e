//! CLI interface tests

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const DATA_DIR: &str = "Hollow Knight Silksong_Data";

fn silksong_cht() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_silksong-cht"));
    cmd.env("RUST_LOG", "off");
    cmd
}

/// A Linux-layout game directory with placeholder files at every target path.
fn fake_install(root: &Path) -> Vec<PathBuf> {
    let streaming = root.join(DATA_DIR).join("StreamingAssets/aa/StandaloneLinux64");
    let targets = vec![
        streaming.join("fonts_assets_chinese.bundle"),
        root.join(DATA_DIR).join("resources.assets"),
        streaming.join("atlases_assets_assets/sprites/_atlases/title.spriteatlas.bundle"),
    ];
    for (i, target) in targets.iter().enumerate() {
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(target, format!("live file {}", i)).unwrap();
    }
    targets
}

#[test]
fn test_help_lists_subcommands() {
    let output = silksong_cht().arg("--help").output().expect("Failed to run help");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("apply"), "Should list apply command");
    assert!(stdout.contains("restore"), "Should list restore command");
    assert!(stdout.contains("info"), "Should list info command");
    assert!(stdout.contains("--game-dir"), "Should have game dir option");
}

#[test]
fn test_restore_without_backup() {
    let dir = tempfile::tempdir().unwrap();
    let targets = fake_install(dir.path());

    let output = silksong_cht()
        .args(["--platform", "linux", "--game-dir"])
        .arg(dir.path())
        .arg("restore")
        .output()
        .expect("Failed to run restore");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.matches("No backup found").count(), 3, "Every bundle should be reported: {}", stdout);
    for (i, target) in targets.iter().enumerate() {
        assert_eq!(fs::read_to_string(target).unwrap(), format!("live file {}", i));
    }
    assert!(!dir.path().join("Backup").exists());
}

#[test]
fn test_missing_game_dir_fails() {
    let dir = tempfile::tempdir().unwrap();

    let output = silksong_cht()
        .args(["--platform", "linux", "--game-dir"])
        .arg(dir.path().join("nowhere"))
        .arg("info")
        .output()
        .expect("Failed to run info");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("does not exist"), "Should explain the failure: {}", stderr);
}

#[test]
fn test_apply_without_catalog_fails() {
    let dir = tempfile::tempdir().unwrap();
    let targets = fake_install(dir.path());

    let output = silksong_cht()
        .args(["--platform", "linux", "--game-dir"])
        .arg(dir.path())
        .arg("--catalog")
        .arg(dir.path().join("CHT"))
        .args(["apply", "--yes"])
        .output()
        .expect("Failed to run apply");

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(fs::read_to_string(&targets[1]).unwrap(), "live file 1");
    assert!(!dir.path().join("Backup").exists());
}

#[test]
fn test_info_reports_bundle_states() {
    let dir = tempfile::tempdir().unwrap();
    fake_install(dir.path());

    let output = silksong_cht()
        .args(["--platform", "linux", "--game-dir"])
        .arg(dir.path())
        .arg("info")
        .output()
        .expect("Failed to run info");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Platform: Linux"));
    assert_eq!(stdout.matches("[untouched]").count(), 3);
}
