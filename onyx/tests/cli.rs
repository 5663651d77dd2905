//! Black-box tests of the onyx binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const LOG: &str = "#AUDIOSCROBBLER/1.1\n\
    #TZ/UTC\n\
    #CLIENT/Rockbox sansaclipplus $Revision$\n\
    Band\tAlbum\tFirst\t1\t200\tL\t1714557600\t\n\
    Band\tAlbum\tSkipped\t2\t180\tS\t1714557800\t\n\
    Band\t\tSecond\t\t150\tL\t1714558000\t\n";

#[allow(deprecated)]
fn onyx_cmd(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("onyx").unwrap();
    cmd.env("ONYX_CONFIG_DIR", config_dir.path())
        .env_remove("ONYX_APP_PASSWORD")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_output() {
    let dir = TempDir::new().unwrap();
    onyx_cmd(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("teal.fm"))
        .stdout(predicate::str::contains("auth"))
        .stdout(predicate::str::contains("scrobble"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn test_scrobble_help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    onyx_cmd(&dir)
        .args(["scrobble", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("track"))
        .stdout(predicate::str::contains("logfile"));
}

#[test]
fn test_dry_run_without_login() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join(".scrobbler.log");
    fs::write(&log, LOG).unwrap();

    onyx_cmd(&dir)
        .args(["scrobble", "logfile", "--dry-run", "--delete"])
        .arg(&log)
        .assert()
        .success()
        .stdout(predicate::str::contains("First"))
        .stdout(predicate::str::contains("Second"))
        .stdout(predicate::str::contains("Skipped").not())
        .stdout(predicate::str::contains("2 tracks would be submitted"));

    assert!(log.exists(), "dry run must not delete the log");
}

#[test]
fn test_dry_run_reports_parse_errors() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join(".scrobbler.log");
    fs::write(&log, "#TZ/UTC\nBand\tAlbum\tSong\t1\t200\tL\t1714557600\n").unwrap();

    onyx_cmd(&dir)
        .args(["scrobble", "logfile", "--dry-run"])
        .arg(&log)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Log version not specified"));
}

#[test]
fn test_scrobble_requires_login() {
    let dir = TempDir::new().unwrap();
    onyx_cmd(&dir)
        .args(["scrobble", "track", "Song", "--artist", "Band"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not logged in"));
}

#[test]
fn test_logout_requires_login() {
    let dir = TempDir::new().unwrap();
    onyx_cmd(&dir)
        .args(["auth", "logout"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not logged in"));
}

#[test]
fn test_status_get_defaults_to_logged_in_account() {
    let dir = TempDir::new().unwrap();
    onyx_cmd(&dir)
        .args(["status", "get"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not logged in"));
}

#[test]
fn test_invalid_played_at() {
    let dir = TempDir::new().unwrap();
    onyx_cmd(&dir)
        .args(["scrobble", "track", "Song", "--played-at", "yesterday"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("RFC 3339"));
}

#[test]
fn test_invalid_config_file() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("config.toml"), "timeout_secs = \"soon\"\n").unwrap();

    onyx_cmd(&dir)
        .args(["auth", "whoami"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid config file"));
}

#[test]
fn test_status_set_rejects_non_positive_expiry() {
    let dir = TempDir::new().unwrap();
    onyx_cmd(&dir)
        .args(["status", "set", "Song", "--expiry-minutes", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--expiry-minutes"));
}

#[test]
fn test_login_rejects_empty_app_password() {
    let dir = TempDir::new().unwrap();
    onyx_cmd(&dir)
        .args(["auth", "login", "alice.example.com", "--password", ""])
        .assert()
        .failure()
        .stderr(predicate::str::contains("App password cannot be empty"));

    assert!(!dir.path().join("session.json").exists());
}
