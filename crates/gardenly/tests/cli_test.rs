//! Integration tests for the `gardenly` binary.
//!
//! Argument parsing and config handling run without a cloud; the
//! cloud-facing commands run against a wiremock server.
#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// A `gardenly` command isolated from the user's environment.
fn gardenly_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("gardenly");
    cmd.env("HOME", "/tmp/gardenly-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/gardenly-cli-test-nonexistent")
        .env_remove("GARDENLY_CONFIG")
        .env_remove("GARDENLY_USERNAME")
        .env_remove("GARDENLY_PASSWORD")
        .env_remove("RUST_LOG");
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

/// Write `config.toml` (+ descriptor) into a fresh temp dir.
fn workspace(config: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, config).unwrap();
    std::fs::write(
        dir.path().join("descriptor.json"),
        serde_json::to_string_pretty(&json!({
            "L1___D1___mower___status": { "location": "L1", "device": "D1", "type": "string" },
            "L1___D1___mow": {
                "location": "L1", "device": "D1",
                "command": { "name": "start_override_timer", "parameters": { "duration": { "type": "number", "default": 60 } } }
            }
        }))
        .unwrap(),
    )
    .unwrap();
    (dir, config_path)
}

fn cloud_config(server: &MockServer) -> String {
    format!(
        "[cloud]\nbase_url = \"{}\"\nusername = \"me@example.com\"\ntimeout = 5\n",
        server.uri()
    )
}

fn with_config(path: &Path) -> assert_cmd::Command {
    let mut cmd = gardenly_cmd();
    cmd.arg("--config").arg(path).env("GARDENLY_PASSWORD", "secret");
    cmd
}

async fn mock_cloud() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/sg-1/sessions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "sessions": { "token": "tok-1", "user_id": "U1", "refresh_token": "r-1" }
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/sg-1/locations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "locations": [ { "id": "L1", "name": "Backyard", "devices": ["D1"] } ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/sg-1/devices"))
        .and(query_param("locationId", "L1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "devices": [{
                "id": "D1",
                "name": "Sileno",
                "category": "mower",
                "abilities": [
                    { "id": "mower", "name": "mower", "properties": [
                        { "id": "status", "name": "status", "value": "ok_cutting" }
                    ] }
                ]
            }]
        })))
        .mount(&server)
        .await;

    server
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = gardenly_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn test_help_lists_commands() {
    gardenly_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("run")
            .and(predicate::str::contains("locations"))
            .and(predicate::str::contains("trigger"))
            .and(predicate::str::contains("discover")),
    );
}

#[test]
fn test_run_help_documents_the_control_channel() {
    gardenly_cmd().args(["run", "--help"]).assert().success().stdout(
        predicate::str::contains("lives in this process")
            .and(predicate::str::contains("ADDRESS=VALUE"))
            .and(predicate::str::contains("SIGUSR1")),
    );
}

#[test]
fn test_version_flag() {
    gardenly_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("gardenly"));
}

#[test]
fn test_completions_zsh() {
    gardenly_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

#[test]
fn test_invalid_subcommand() {
    let output = gardenly_cmd().arg("foobar").output().unwrap();
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("foobar"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honors_flag() {
    gardenly_cmd()
        .args(["--config", "/tmp/custom-gardenly.toml", "config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/tmp/custom-gardenly.toml"));
}

#[test]
fn test_config_show_masks_password() {
    let (_dir, config) = workspace(
        "[cloud]\nusername = \"me@example.com\"\npassword = \"hunter2\"\n\n[polling]\ninterval_secs = 120\n",
    );
    gardenly_cmd()
        .arg("--config")
        .arg(&config)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("interval_secs = 120")
                .and(predicate::str::contains("hunter2").not()),
        );
}

#[test]
fn test_missing_username_exits_with_auth_code() {
    let (_dir, config) = workspace("[polling]\ninterval_secs = 300\n");
    with_config(&config)
        .arg("check")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("username"));
}

#[test]
fn test_sub_floor_interval_is_rejected() {
    let (_dir, config) = workspace(
        "[cloud]\nusername = \"me@example.com\"\n\n[polling]\ninterval_secs = 10\n",
    );
    with_config(&config)
        .arg("check")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("polling"));
}

// ── Against a mock cloud ────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_check_reports_user() {
    let server = mock_cloud().await;
    let (_dir, config) = workspace(&cloud_config(&server));

    with_config(&config)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("user U1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rejected_login_exits_with_auth_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sg-1/sessions"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let (_dir, config) = workspace(&cloud_config(&server));

    with_config(&config).arg("check").assert().code(3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_locations_plain_output() {
    let server = mock_cloud().await;
    let (_dir, config) = workspace(&cloud_config(&server));

    with_config(&config)
        .args(["--output", "plain", "locations"])
        .assert()
        .success()
        .stdout(predicate::str::diff("L1\n"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_discover_emits_descriptor() {
    let server = mock_cloud().await;
    let (_dir, config) = workspace(&cloud_config(&server));

    let output = with_config(&config)
        .args(["discover", "--location", "L1"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let descriptor: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(descriptor["L1___D1___mower___status"]["type"], json!("string"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sync_prints_tree() {
    let server = mock_cloud().await;
    let (_dir, config) = workspace(&cloud_config(&server));

    with_config(&config)
        .args(["--output", "json", "sync"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("datapoints.L1.D1.mower.status")
                .and(predicate::str::contains("ok_cutting"))
                .and(predicate::str::contains("datapoints.L1.D1.mow.parameters.duration")),
        );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_trigger_sends_command() {
    let server = mock_cloud().await;
    Mock::given(method("POST"))
        .and(path("/sg-1/devices/D1/mow"))
        .and(query_param("locationId", "L1"))
        .and(body_json(json!({ "name": "start_override_timer", "parameters": { "duration": 45 } })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    let (_dir, config) = workspace(&cloud_config(&server));

    with_config(&config)
        .args(["trigger", "L1.D1.mow.trigger", "--param", "duration=45"])
        .assert()
        .success()
        .stdout(predicate::str::contains("POST /sg-1/devices/D1/mow?locationId=L1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_trigger_unknown_node_is_not_found() {
    let server = mock_cloud().await;
    let (_dir, config) = workspace(&cloud_config(&server));

    with_config(&config)
        .args(["trigger", "L1.D1.park.trigger"])
        .assert()
        .code(4);
}
