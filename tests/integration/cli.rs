#[path = "common/mod.rs"]
mod common;

use std::fs;

use assert_cmd::Command;
use predicates::{boolean::PredicateBooleanExt, str::contains};
use tempfile::tempdir;

#[test]
fn help_lists_commands() {
    Command::new(assert_cmd::cargo::cargo_bin!("srelay"))
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("run").and(contains("notify")).and(contains("logs")));
}

#[test]
fn logs_prints_tail_of_capture_file() {
    let temp = tempdir().expect("failed to create tempdir");
    let log_dir = temp.path().join("logs");
    fs::create_dir_all(&log_dir).expect("failed to create log dir");
    fs::write(
        log_dir.join("live__abc123--Twitch.err.log"),
        "frame=1\nframe=2\nframe=3\n",
    )
    .expect("failed to write log");

    Command::new(assert_cmd::cargo::cargo_bin!("srelay"))
        .args(["logs", "--stream", "/live/abc123", "--target", "Twitch"])
        .args(["--lines", "2", "--log-dir"])
        .arg(&log_dir)
        .assert()
        .success()
        .stdout(
            contains("frame=2")
                .and(contains("frame=3"))
                .and(contains("frame=1").not()),
        );
}

#[test]
fn logs_uses_configured_directory() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let config_path = common::write_config(
        dir,
        r#"version: "1"
log_dir: capture
"#,
    );
    fs::create_dir_all(dir.join("capture")).expect("failed to create log dir");
    fs::write(dir.join("capture/live__abc123--hls.out.log"), "segment written\n")
        .expect("failed to write log");

    Command::new(assert_cmd::cargo::cargo_bin!("srelay"))
        .args(["logs", "-s", "live/abc123", "-t", "hls", "-k", "stdout", "-c"])
        .arg(&config_path)
        .assert()
        .success()
        .stdout(contains("segment written"));
}

#[test]
fn logs_for_unknown_relay_fails() {
    let temp = tempdir().expect("failed to create tempdir");

    Command::new(assert_cmd::cargo::cargo_bin!("srelay"))
        .args(["logs", "--stream", "live/abc123", "--target", "Kick", "--log-dir"])
        .arg(temp.path())
        .assert()
        .failure()
        .stderr(contains("LogUnavailable"));
}

#[test]
fn run_with_missing_config_fails() {
    let temp = tempdir().expect("failed to create tempdir");

    Command::new(assert_cmd::cargo::cargo_bin!("srelay"))
        .arg("run")
        .arg("--config")
        .arg(temp.path().join("missing.yaml"))
        .assert()
        .failure()
        .stderr(contains("missing.yaml"));
}

#[test]
fn run_rejects_reserved_destination_name() {
    let temp = tempdir().expect("failed to create tempdir");
    let config_path = common::write_config(
        temp.path(),
        r#"version: "1"
destinations:
  - name: hls
    url: rtmp://example/app/key
"#,
    );

    Command::new(assert_cmd::cargo::cargo_bin!("srelay"))
        .arg("run")
        .arg("--config")
        .arg(&config_path)
        .assert()
        .failure()
        .stderr(contains("reserved"));
}

#[test]
fn notify_requires_a_stream() {
    Command::new(assert_cmd::cargo::cargo_bin!("srelay"))
        .args(["notify", "started"])
        .assert()
        .failure();
}
