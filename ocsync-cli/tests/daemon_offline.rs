//! Client commands when no daemon is listening.

use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn ocsync_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("ocsync"));
    cmd.env("HOME", home).env("USERPROFILE", home);
    cmd
}

#[test]
fn daemon_status_reports_not_running_as_json() {
    let home = TempDir::new().expect("home");
    let output = ocsync_cmd(home.path())
        .args(["daemon", "status"])
        .output()
        .expect("run");
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(value["running"], false);
    assert!(value["socket"]
        .as_str()
        .expect("socket path")
        .ends_with("daemon.sock"));
}

#[test]
fn daemon_stop_when_not_running_is_not_an_error() {
    let home = TempDir::new().expect("home");
    ocsync_cmd(home.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("daemon is not running"));
}

#[test]
fn status_json_when_not_running() {
    let home = TempDir::new().expect("home");
    ocsync_cmd(home.path())
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(contains(r#"{"running":false}"#));
}

#[test]
fn status_and_sync_fail_with_hint() {
    let home = TempDir::new().expect("home");
    ocsync_cmd(home.path())
        .args(["status"])
        .assert()
        .failure()
        .stderr(contains("ocsync daemon start"));
    ocsync_cmd(home.path())
        .args(["sync"])
        .assert()
        .failure()
        .stderr(contains("daemon is not running"));
}

#[test]
fn json_and_follow_conflict() {
    let home = TempDir::new().expect("home");
    ocsync_cmd(home.path())
        .args(["status", "--json", "--follow"])
        .assert()
        .failure();
}
