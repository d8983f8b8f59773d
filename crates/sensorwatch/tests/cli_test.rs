//! Integration tests for the `sensorwatch` binary.
//!
//! Argument parsing, config handling and error exit codes run without a
//! server; the query commands run against a `wiremock` server.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// A `sensorwatch` command isolated from the user's environment and
/// pointed at `config` as its config file.
fn sensorwatch(config: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("sensorwatch");
    cmd.env("HOME", "/tmp/sensorwatch-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/sensorwatch-cli-test-nonexistent")
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("SENSORWATCH_CONFIG")
        .env_remove("SENSORWATCH_OUTPUT")
        .env_remove("SENSORWATCH_SERVER__URL")
        .arg("--config")
        .arg(config);
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

/// Run a command off the async runtime so the mock server keeps serving.
async fn run(mut cmd: assert_cmd::Command) -> std::process::Output {
    tokio::task::spawn_blocking(move || cmd.output().unwrap())
        .await
        .unwrap()
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn no_args_shows_help() {
    let output = cargo_bin_cmd!("sensorwatch").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn help_lists_commands() {
    cargo_bin_cmd!("sensorwatch")
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("watch")
                .and(predicate::str::contains("devices"))
                .and(predicate::str::contains("sensors"))
                .and(predicate::str::contains("config")),
        );
}

#[test]
fn version_flag() {
    cargo_bin_cmd!("sensorwatch")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sensorwatch"));
}

#[test]
fn malformed_feed_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    sensorwatch(&dir.path().join("config.toml"))
        .args(["watch", "phone:"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no sensors listed"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn config_path_honours_flag() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("custom.toml");
    sensorwatch(&file)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn config_show_prints_defaults() {
    let dir = tempfile::tempdir().unwrap();
    sensorwatch(&dir.path().join("config.toml"))
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[monitor]")
                .and(predicate::str::contains("recent_data_window_ms = 10000")),
        );
}

#[test]
fn config_init_requires_server() {
    let dir = tempfile::tempdir().unwrap();
    let output = sensorwatch(&dir.path().join("config.toml"))
        .args(["config", "init"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(combined_output(&output).contains("No sensor server configured"));
}

#[test]
fn config_init_writes_once() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("sub").join("config.toml");

    sensorwatch(&file)
        .args(["--server", "http://192.168.1.20:8000", "config", "init"])
        .assert()
        .success();
    let text = std::fs::read_to_string(&file).unwrap();
    assert!(text.contains("url = \"http://192.168.1.20:8000\""), "{text}");

    sensorwatch(&file)
        .args(["--server", "http://192.168.1.21:8000", "config", "init"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("already exists"));

    sensorwatch(&file)
        .args(["--server", "http://192.168.1.21:8000", "config", "init", "--force"])
        .assert()
        .success();
    let text = std::fs::read_to_string(&file).unwrap();
    assert!(text.contains("192.168.1.21"), "{text}");
}

#[test]
fn devices_without_server_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = sensorwatch(&dir.path().join("config.toml"))
        .arg("devices")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(combined_output(&output).contains("--server"));
}

#[test]
fn watch_with_nothing_to_watch_fails() {
    let dir = tempfile::tempdir().unwrap();
    sensorwatch(&dir.path().join("config.toml"))
        .args(["--server", "http://127.0.0.1:9", "watch", "--no-directory"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Nothing to watch"));
}

// ── Against a server ────────────────────────────────────────────────

#[tokio::test]
async fn devices_lists_directory() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "phone": {"name": "Pixel", "sensor_count": 3, "active_sensor_count": 2},
            "tablet": {"name": "Tab"}
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut cmd = sensorwatch(&dir.path().join("config.toml"));
    cmd.args(["--server", &server.uri(), "-o", "plain", "devices"]);
    let output = run(cmd).await;

    assert!(output.status.success(), "{}", combined_output(&output));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "phone\ntablet\n");
}

#[tokio::test]
async fn sensors_as_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/device/phone/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_id": "phone",
            "sensors": {
                "accelerometer": {
                    "has_data": true, "data_points": 250,
                    "time_since_last_update": 0.4, "is_recent": true
                }
            }
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut cmd = sensorwatch(&dir.path().join("config.toml"));
    cmd.args(["--server", &server.uri(), "-o", "json", "sensors", "phone"]);
    let output = run(cmd).await;

    assert!(output.status.success(), "{}", combined_output(&output));
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed[0]["sensor"], "accelerometer");
    assert_eq!(parsed[0]["data_points"], 250);
}

#[tokio::test]
async fn sensors_of_unknown_device_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/device/ghost/info"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut cmd = sensorwatch(&dir.path().join("config.toml"));
    cmd.args(["--server", &server.uri(), "sensors", "ghost"]);
    let output = run(cmd).await;

    assert_eq!(output.status.code(), Some(4), "{}", combined_output(&output));
}

#[tokio::test]
async fn bounded_watch_prints_final_snapshot() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = sensorwatch(&dir.path().join("config.toml"));
    cmd.args([
        "--server",
        &server.uri(),
        "-o",
        "plain",
        "watch",
        "--no-directory",
        "--duration",
        "300ms",
        "phone:accelerometer",
    ]);
    let output = run(cmd).await;

    assert!(output.status.success(), "{}", combined_output(&output));
    assert!(String::from_utf8_lossy(&output.stdout).contains("phone/accelerometer"));
}
