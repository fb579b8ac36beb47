//! Integration tests for the resolving commands against a local server.

#![allow(deprecated)] // Command::cargo_bin is deprecated in newer assert_cmd

mod support;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};

use support::{config_toml, dash_ok, dash_target, episode_page, TestServer};

fn iqresolve() -> Command {
    Command::cargo_bin("iqresolve").expect("binary 'iqresolve' should be built")
}

fn write_config(server: &TestServer, name: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("iqresolve-{name}-{}.toml", std::process::id()));
    std::fs::write(&path, config_toml(server)).expect("write config");
    path
}

fn json_lines(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line should be JSON"))
        .collect()
}

#[test]
fn resolve_prints_manifest_record() {
    let server = TestServer::spawn();
    server.route("/play/show-episode-4-dd", 200, episode_page("6400", 3, "Episode 4", 4, None));
    server.route(&dash_target("6400", 3), 200, dash_ok("#EXTM3U\nep4.ts"));

    let output = iqresolve()
        .arg("--config")
        .arg(write_config(&server, "resolve"))
        .args(["resolve", &server.url("/play/show-episode-4-dd")])
        .timeout(std::time::Duration::from_secs(30))
        .output()
        .unwrap();
    assert!(output.status.success());

    let records = json_lines(&output.stdout);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["ordinal"], 4);
    assert_eq!(records[0]["manifest"]["tvid"], "6400");
    assert_eq!(records[0]["strategy_used"], "direct_extraction");
    assert_eq!(records[0]["subtitles"][0]["format"], "srt");
}

#[test]
fn subtitles_honours_format_filter() {
    let server = TestServer::spawn();
    server.route("/play/show-episode-5-ee", 200, episode_page("6500", 3, "Episode 5", 5, None));
    server.route(&dash_target("6500", 3), 200, dash_ok("#EXTM3U\nep5.ts"));

    let output = iqresolve()
        .arg("--config")
        .arg(write_config(&server, "subtitles"))
        .args(["subtitles", &server.url("/play/show-episode-5-ee"), "--format", "vtt"])
        .timeout(std::time::Duration::from_secs(30))
        .output()
        .unwrap();
    assert!(output.status.success());

    let tracks = json_lines(&output.stdout);
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0]["format"], "webvtt");
    assert!(tracks[0]["url"].as_str().unwrap().contains("qd_tvid=6500"));
}

#[test]
fn list_prints_text_table() {
    let server = TestServer::spawn();
    let playlist = json!([
        {"albumPlayUrl": "/play/show-episode-1-f1", "subTitle": "Episode 1", "order": 1},
        {"albumPlayUrl": "/play/show-promo-p1", "subTitle": "Promo"}
    ]);
    server.route("/play/show-episode-1-f1", 200, episode_page("6600", 3, "Episode 1", 1, Some(playlist)));

    iqresolve()
        .arg("--config")
        .arg(write_config(&server, "list"))
        .args(["--output", "text", "list", &server.url("/play/show-episode-1-f1")])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicate::str::contains("Test Show"))
        .stdout(predicate::str::contains("episode"))
        .stdout(predicate::str::contains("preview"));
}

#[test]
fn resolve_failure_exits_nonzero_with_attempts() {
    let server = TestServer::spawn();
    server.route("/play/gone", 200, "<html></html>");

    iqresolve()
        .arg("--config")
        .arg(write_config(&server, "failure"))
        .args(["--output", "text", "resolve", &server.url("/play/gone")])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .failure()
        .stderr(predicate::str::contains("direct_extraction"))
        .stderr(predicate::str::contains("html_scan"));
}
