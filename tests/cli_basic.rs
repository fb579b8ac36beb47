//! Integration tests for basic CLI behavior.
//!
//! Tests that the binary exists, accepts standard flags, and each subcommand
//! responds to `--help` with appropriate text. Nothing here touches the network.

#![allow(deprecated)] // Command::cargo_bin is deprecated in newer assert_cmd

use assert_cmd::Command;
use predicates::prelude::*;

/// Helper: get a Command for the `iqresolve` binary.
fn iqresolve() -> Command {
    Command::cargo_bin("iqresolve").expect("binary 'iqresolve' should be built")
}

/// Config file with no target URL, so commands never fall back to one.
fn empty_config() -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("iqresolve-cli-basic-{}.toml", std::process::id()));
    std::fs::write(&path, "max_episodes = 10\n").expect("write config");
    path
}

// ─── Top-level flags ─────────────────────────────────────────────────────────

#[test]
fn help_flag_shows_usage() {
    iqresolve()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: iqresolve"))
        .stdout(predicate::str::contains("resolve"))
        .stdout(predicate::str::contains("subtitles"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("series"));
}

#[test]
fn version_flag_shows_semver() {
    iqresolve()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^iqresolve \d+\.\d+\.\d+\n$").unwrap());
}

#[test]
fn no_args_shows_error_and_usage() {
    iqresolve()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage: iqresolve"));
}

#[test]
fn invalid_subcommand_fails() {
    iqresolve()
        .arg("this-is-not-a-real-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

// ─── Subcommand help ─────────────────────────────────────────────────────────

#[test]
fn subtitles_help_lists_format_option() {
    iqresolve()
        .args(["subtitles", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--format"));
}

#[test]
fn series_help_lists_filter() {
    iqresolve()
        .args(["series", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--episodes-only"));
}

// ─── Argument validation ─────────────────────────────────────────────────────

#[test]
fn unknown_subtitle_format_is_rejected() {
    iqresolve()
        .args(["subtitles", "https://www.iq.com/play/x", "--format", "ass"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown subtitle format"));
}

#[test]
fn list_filters_conflict() {
    iqresolve()
        .args(["list", "https://www.iq.com/play/x", "--episodes-only", "--previews-only"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn malformed_url_is_rejected() {
    iqresolve()
        .arg("--config")
        .arg(empty_config())
        .args(["resolve", "not a url"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid URL"));
}

#[test]
fn missing_url_without_target_fails() {
    iqresolve()
        .arg("--config")
        .arg(empty_config())
        .arg("resolve")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No URL given"));
}

#[test]
fn unreadable_config_fails() {
    iqresolve()
        .args(["--config", "/nonexistent/iqresolve.toml", "resolve", "https://www.iq.com/play/x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}
