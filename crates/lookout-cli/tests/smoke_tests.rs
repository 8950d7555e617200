//! Smoke tests for the lookout CLI
//!
//! None of these launch a browser.

#![allow(deprecated)] // Command::cargo_bin
#![allow(clippy::expect_used, clippy::unwrap_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Get a command for the lookout binary
fn lookout() -> Command {
    let mut cmd = Command::cargo_bin("lookout").expect("lookout binary should exist");
    cmd.env_remove("RUST_LOG")
        .env_remove("LOOKOUT_CONFIG")
        .env_remove("LOOKOUT_BASE_URL")
        .env_remove("LOOKOUT_ARTIFACT_DIR");
    cmd
}

fn shipped_scenarios() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../scenarios")
}

// ============================================================================
// Basic CLI Tests
// ============================================================================

#[test]
fn test_version_flag() {
    lookout()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_help_flag() {
    lookout()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn test_no_args_fails() {
    lookout().assert().failure();
}

#[test]
fn test_run_help_lists_flags() {
    lookout()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--base-url"))
        .stdout(predicate::str::contains("--jobs"))
        .stdout(predicate::str::contains("--report"));
}

// ============================================================================
// Validate
// ============================================================================

#[test]
fn test_validate_shipped_scenarios() {
    lookout()
        .args(["--color", "never", "validate"])
        .arg(shipped_scenarios())
        .assert()
        .success()
        .stdout(predicate::str::contains("fitting-room"))
        .stdout(predicate::str::contains("1. navigate /characters"))
        .stderr(predicate::str::contains("PASS"));
}

#[test]
fn test_validate_reports_invalid_file() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("dangling.yaml"),
        "name: dangling\nsteps:\n  - navigate: /\n  - assert: { target: ghost, check: visible }\n",
    )
    .unwrap();

    lookout()
        .args(["--color", "never", "validate"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("FAIL"))
        .stderr(predicate::str::contains("ghost"));
}

#[test]
fn test_validate_missing_path() {
    lookout()
        .args(["validate", "/nonexistent/lookout/scenarios"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_quiet_validate_prints_no_plan() {
    lookout()
        .args(["-q", "validate"])
        .arg(shipped_scenarios().join("settings_header.yaml"))
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

// ============================================================================
// Run (failure paths that stop before a browser is launched)
// ============================================================================

#[test]
fn test_run_rejects_invalid_config_file() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("lookout.yaml");
    fs::write(&config, "base_url: ''\n").unwrap();

    lookout()
        .arg("--config")
        .arg(&config)
        .arg("run")
        .arg(shipped_scenarios())
        .assert()
        .failure()
        .stderr(predicate::str::contains("base_url"));
}

#[test]
fn test_run_rejects_invalid_scenario() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("empty.yaml"), "name: empty\nsteps: []\n").unwrap();

    lookout()
        .arg("--config")
        .arg(dir.path().join("absent.yaml"))
        .arg("run")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("no steps"));
}
