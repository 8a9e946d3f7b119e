//! CLI integration tests for mdb-mysql-migrate.
//!
//! These tests verify argument parsing, help output and exit codes. The
//! ones that run a real migration use an empty or missing source tree, so
//! they need neither mdbtools nor a MySQL server.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the mdb-mysql-migrate binary.
fn cmd() -> Command {
    Command::cargo_bin("mdb-mysql-migrate").unwrap()
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_connection_flags() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("SOURCE_DIR"))
        .stdout(predicate::str::contains("--host"))
        .stdout(predicate::str::contains("--port"))
        .stdout(predicate::str::contains("--user"))
        .stdout(predicate::str::contains("--password"))
        .stdout(predicate::str::contains("--log-dir"));
}

#[test]
fn test_help_shows_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mdb-mysql-migrate"));
}

// =============================================================================
// Exit Code Tests - Configuration Errors
// =============================================================================

#[test]
fn test_no_source_and_no_config_is_fatal() {
    cmd()
        .assert()
        .code(2)
        .stderr(predicate::str::contains("root_dir"));
}

#[test]
fn test_missing_config_file_is_fatal() {
    cmd()
        .args(["--config", "nonexistent_config_file.yaml"])
        .assert()
        .code(2);
}

#[test]
fn test_invalid_yaml_is_fatal() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap()])
        .assert()
        .code(2);
}

#[test]
fn test_config_missing_required_fields_is_fatal() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "source:").unwrap();
    writeln!(file, "  root_dir: /tmp").unwrap();
    // no target.user

    cmd()
        .args(["--config", file.path().to_str().unwrap()])
        .assert()
        .code(2);
}

#[test]
fn test_missing_source_dir_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    cmd()
        .args([
            dir.path().join("does_not_exist").to_str().unwrap(),
            "--log-dir",
            dir.path().join("logs").to_str().unwrap(),
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Discovery failed"));
}

// =============================================================================
// Empty-Tree Runs (no mdbtools or MySQL required)
// =============================================================================

#[test]
fn test_empty_source_dir_is_successful_noop() {
    let dir = tempfile::tempdir().unwrap();
    let logs = dir.path().join("logs");

    cmd()
        .args([
            dir.path().to_str().unwrap(),
            "--log-dir",
            logs.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Migration finished"))
        .stdout(predicate::str::contains("Rows: 0 loaded"));

    // the run still produces its report pair and event log
    let names: Vec<String> = std::fs::read_dir(&logs)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert!(names.iter().any(|n| n.starts_with("migration_report_")));
    assert!(names.iter().any(|n| n.starts_with("migration_summary_")));
    assert!(names.iter().any(|n| n == "migration_events.log"));
}

#[test]
fn test_output_json_prints_summary_to_stdout() {
    let dir = tempfile::tempdir().unwrap();

    let output = cmd()
        .args([
            dir.path().to_str().unwrap(),
            "--log-dir",
            dir.path().join("logs").to_str().unwrap(),
            "--output-json",
        ])
        .assert()
        .success();

    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["tables_total"], 0);
    assert_eq!(parsed["rows_loaded"], 0);
    assert!(parsed["run_id"].is_string());
}
