//! CLI behaviour of cozctl: argument errors, exit codes, and the commands
//! that work without a profiled process.

use assert_cmd::Command;
use coz_common::{Experiment, ProcessDescriptor};
use predicates::prelude::*;
use std::time::Duration;

fn cozctl() -> Command {
    Command::cargo_bin("cozctl").expect("cozctl binary should exist")
}

// ============================================================================
// Argument errors
// ============================================================================

mod invalid_args {
    use super::*;

    #[test]
    fn unknown_command_is_args_error() {
        cozctl()
            .arg("nonexistent-command")
            .assert()
            .code(10)
            .stderr(predicate::str::contains("error"));
    }

    #[test]
    fn profile_requires_pid_and_progress_point() {
        cozctl()
            .args(["profile", "-s", "com.example"])
            .assert()
            .code(10)
            .stderr(predicate::str::contains("--class"));
    }

    #[test]
    fn non_numeric_line_is_rejected() {
        cozctl()
            .args(["profile", "-c", "Foo.java", "-l", "twelve", "-p", "1", "-s", "x"])
            .assert()
            .code(10);
    }

    #[test]
    fn help_exits_clean() {
        cozctl()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("profile"));
    }

    #[test]
    fn malformed_config_is_args_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("coz.json");
        std::fs::write(&config, "{ not json").unwrap();
        cozctl()
            .args(["list", "--config"])
            .arg(&config)
            .assert()
            .code(10)
            .stderr(predicate::str::contains("Configuration Error"));
    }
}

// ============================================================================
// version / show
// ============================================================================

#[test]
fn version_reports_protocol_and_schema() {
    cozctl()
        .args(["version", "-f", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"protocol_version\""))
        .stdout(predicate::str::contains("\"profile_schema_version\""));
}

#[test]
fn show_summarizes_a_saved_profile() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.coz");
    let mut profile = coz_profile::Profile::new("build-host");
    profile.merge(vec![
        Experiment::new(100, 0, Duration::from_secs(1), 1),
        Experiment::new(150, 20, Duration::from_secs(1), 2),
    ]);
    coz_profile::persist(&profile, &path).unwrap();

    cozctl()
        .arg("show")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("build-host"))
        .stdout(predicate::str::contains("Experiments: 2"));

    let out = cozctl()
        .args(["show", "-f", "json"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(out.status.success());
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["summary"]["experiments"], 2);
    assert_eq!(json["summary"]["total_hits"], 250);
}

#[test]
fn show_missing_profile_is_profile_load_error() {
    let dir = tempfile::tempdir().unwrap();
    cozctl()
        .arg("show")
        .arg(dir.path().join("absent.coz"))
        .assert()
        .code(17)
        .stderr(predicate::str::contains("Profile Load Error"));
}

#[test]
fn show_corrupt_profile_reports_structured_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.coz");
    std::fs::write(&path, b"garbage").unwrap();
    let out = cozctl()
        .args(["show", "-f", "json"])
        .arg(&path)
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(17));
    let json: serde_json::Value = serde_json::from_slice(&out.stderr).unwrap();
    assert_eq!(json["category"], "profile");
}

// ============================================================================
// profile without a reachable target
// ============================================================================

#[test]
fn profile_with_unreadable_existing_profile_fails_before_attach() {
    let dir = tempfile::tempdir().unwrap();
    let existing = dir.path().join("bad.coz");
    std::fs::write(&existing, b"garbage").unwrap();
    cozctl()
        .args(["profile", "-c", "Foo.java", "-l", "3", "-p", "1", "-s", "com.example", "-e"])
        .arg(&existing)
        .assert()
        .code(17);
}

#[test]
fn profile_against_dead_control_service_is_attach_error() {
    // Grab a free port, then release it so nothing is listening.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("coz.json");
    std::fs::write(&config, r#"{"connect_timeout_ms": 300, "rpc_timeout_ms": 300}"#).unwrap();
    cozctl()
        .args(["profile", "-c", "Foo.java", "-l", "3", "-p", "1", "-s", "com.example", "-H"])
        .arg(format!("127.0.0.1:{}", port))
        .arg("--config")
        .arg(&config)
        .current_dir(dir.path())
        .assert()
        .code(12)
        .stderr(predicate::str::contains("Attach Failed"));
}

#[test]
fn list_json_is_parseable() {
    let out = cozctl().args(["list", "-f", "json"]).output().unwrap();
    // Hosts without ps fail enumeration; only check shape when it works.
    if out.status.success() {
        let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
        let processes: Vec<ProcessDescriptor> =
            serde_json::from_value(json["processes"].clone()).unwrap();
        assert!(processes.iter().all(|p| p.process_id.0 > 0));
    }
}
