use std::{fs, path::Path};

use assert_cmd::Command;
use tempfile::tempdir;

fn geotagger(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("geotagger").unwrap();
    cmd.arg("--config")
        .arg(home.join("settings.toml"))
        .arg("--cache-file")
        .arg(home.join("cache.json"));
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.output().unwrap();
    assert!(output.status.success(), "{:?}", output);
    String::from_utf8(output.stdout).unwrap()
}

#[test]
fn help_lists_commands() {
    let output = stdout_of(Command::cargo_bin("geotagger").unwrap().arg("--help"));
    assert!(output.contains("tag"));
    assert!(output.contains("cache"));
    assert!(output.contains("config"));
}

#[test]
fn config_set_persists() {
    let home = tempdir().unwrap();

    let set = stdout_of(geotagger(home.path()).args(["config", "set", "cache_precision", "4"]));
    assert_eq!(set.trim(), "cache_precision = 4");

    let shown = stdout_of(geotagger(home.path()).args(["config", "show"]));
    assert!(shown.contains("cache_precision = 4"));
    assert!(shown.contains("write_mode = \"image\""));

    let saved = fs::read_to_string(home.path().join("settings.toml")).unwrap();
    assert!(saved.contains("cache_precision = 4"));
}

#[test]
fn config_set_rejects_invalid_values() {
    let home = tempdir().unwrap();

    geotagger(home.path())
        .args(["config", "set", "cache_precision", "9"])
        .assert()
        .failure()
        .code(1);
    geotagger(home.path())
        .args(["config", "set", "nonsense", "1"])
        .assert()
        .failure();
    assert!(!home.path().join("settings.toml").exists());
}

#[test]
fn cache_stats_on_empty_cache() {
    let home = tempdir().unwrap();

    let stats = stdout_of(geotagger(home.path()).args(["cache", "stats"]));
    assert!(stats.contains("Entries:     0"));
    assert!(stats.contains("Lifetime:    30 days"));
    assert!(stats.contains("5 decimals (~1m, buildings)"));

    let cleared = stdout_of(geotagger(home.path()).args(["cache", "clear"]));
    assert_eq!(cleared.trim(), "Removed 0 entries");
}

#[test]
fn cache_prune_removes_expired_entries() {
    let home = tempdir().unwrap();
    fs::write(
        home.path().join("cache.json"),
        r#"{
  "old": {
    "timestamp": "2001-01-01T00:00:00+00:00",
    "coordinates": {"lat": 1.0, "lon": 1.0},
    "precision": 5,
    "location_data": {"city": "Nowhere"}
  },
  "broken": {
    "timestamp": "not a date",
    "coordinates": {"lat": 2.0, "lon": 2.0},
    "precision": 5,
    "location_data": {}
  }
}"#,
    )
    .unwrap();

    let pruned = stdout_of(geotagger(home.path()).args(["cache", "prune"]));
    assert_eq!(pruned.trim(), "Removed 2 expired entries");

    let stats = stdout_of(geotagger(home.path()).args(["cache", "stats"]));
    assert!(stats.contains("Entries:     0"));
}

#[test]
fn tag_rejects_missing_directory() {
    let home = tempdir().unwrap();

    geotagger(home.path())
        .args(["tag"])
        .arg(home.path().join("does-not-exist"))
        .assert()
        .failure()
        .code(1);
}

#[test]
fn tag_rejects_invalid_precision() {
    let home = tempdir().unwrap();

    geotagger(home.path())
        .args(["tag", ".", "--precision", "2"])
        .assert()
        .failure();
}

#[test]
fn tag_flags_do_not_change_saved_settings() {
    let home = tempdir().unwrap();
    let photos = tempdir().unwrap();

    // `true -ver` succeeds, which is all an empty folder needs from ExifTool.
    geotagger(home.path())
        .arg("tag")
        .arg(photos.path())
        .args(["--sidecar", "--precision", "3", "--exiftool", "true", "--no-skip-existing"])
        .assert()
        .success();

    let shown = stdout_of(geotagger(home.path()).args(["config", "show"]));
    assert!(shown.contains("cache_precision = 5"), "{}", shown);
    assert!(shown.contains("write_mode = \"image\""));
    assert!(shown.contains("skip_if_exists = true"));
    assert!(shown.contains("exiftool_path = \"exiftool\""));
    assert!(shown.contains("last_directory = "));
}
