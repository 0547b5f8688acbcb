//! Integration tests for the `smarthome` CLI binary.
//!
//! Argument parsing, help output, shell completions and error handling,
//! all without a live bridge.
#![allow(clippy::unwrap_used)]

use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// The `smarthome` binary with `SMARTHOME_*` cleared and the config
/// directory pointed somewhere that does not exist.
fn smarthome_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("smarthome");
    cmd.env("HOME", "/tmp/smarthome-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/smarthome-cli-test-nonexistent")
        .env_remove("SMARTHOME_BRIDGE")
        .env_remove("SMARTHOME_CONFIG")
        .env_remove("SMARTHOME_OUTPUT")
        .env_remove("SMARTHOME_TIMEOUT");
    cmd
}

fn write_config(dir: &tempfile::TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, body).unwrap();
    path
}

/// A Shelly on a port nothing listens on: the session opens with the
/// device marked down.
const UNREACHABLE_SHELLY: &str = r#"
timeout = 1

[bridges.plug]
kind = "shelly"
ip = "127.0.0.1:9"
"#;

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    smarthome_cmd()
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_help_flag() {
    smarthome_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("switch")
            .and(predicate::str::contains("brightness"))
            .and(predicate::str::contains("scene"))
            .and(predicate::str::contains("discover")),
    );
}

#[test]
fn test_version_flag() {
    smarthome_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("smarthome"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    smarthome_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("smarthome"));
}

#[test]
fn test_completions_invalid_shell() {
    smarthome_cmd()
        .args(["completions", "tcsh"])
        .assert()
        .failure();
}

// ── Argument validation ─────────────────────────────────────────────

#[test]
fn test_brightness_out_of_range() {
    smarthome_cmd()
        .args(["brightness", "lamp", "140"])
        .assert()
        .code(2);
}

#[test]
fn test_switch_needs_on_or_off() {
    smarthome_cmd()
        .args(["switch", "lamp", "maybe"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("possible values"));
}

// ── Configuration errors ────────────────────────────────────────────

#[test]
fn test_missing_config_is_usage_error() {
    smarthome_cmd()
        .arg("list")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No bridges configured"));
}

#[test]
fn test_unknown_bridge_lists_alternatives() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir, UNREACHABLE_SHELLY);
    smarthome_cmd()
        .arg("--config")
        .arg(&config)
        .args(["--bridge", "nope", "list"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("plug"));
}

#[test]
fn test_bad_color_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir, UNREACHABLE_SHELLY);
    smarthome_cmd()
        .arg("--config")
        .arg(&config)
        .args(["color", "_all_", "teal"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("color"));
}

// ── Discovery ───────────────────────────────────────────────────────

#[test]
fn test_discover_parses_avahi_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("avahi.txt");
    std::fs::write(
        &input,
        "=;eth0;IPv4;Hue Bridge;_hue._tcp;local;hue.local;192.168.1.2;443;\n\
         =;eth0;IPv6;Hue Bridge;_hue._tcp;local;hue.local;fe80::2;443;\n",
    )
    .unwrap();

    smarthome_cmd()
        .args(["--output", "plain", "discover"])
        .arg(&input)
        .assert()
        .success()
        .stdout("192.168.1.2:443\n");
}
