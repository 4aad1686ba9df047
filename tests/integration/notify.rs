#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    process::{Command as StdCommand, Stdio},
    thread,
    time::{Duration, Instant},
};

use assert_cmd::Command;
use common::{CHATTY_ENCODER, fake_encoder, wait_for_content, wait_for_path, write_config};
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use tempfile::tempdir;

#[test]
fn notifications_drive_a_running_supervisor() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let encoder = fake_encoder(dir, CHATTY_ENCODER);
    let socket = dir.join("srelay.sock");
    let config_path = write_config(
        dir,
        &format!(
            r#"version: "1"
encoder:
  program: {}
ingest:
  socket: {}
destinations:
  - name: Twitch
    url: rtmp://twitch.example/app/key1
"#,
            encoder.display(),
            socket.display()
        ),
    );

    let mut supervisor = StdCommand::new(assert_cmd::cargo::cargo_bin!("srelay"))
        .arg("run")
        .arg("--config")
        .arg(&config_path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to start supervisor");
    wait_for_path(&socket);

    Command::new(assert_cmd::cargo::cargo_bin!("srelay"))
        .args(["notify", "started", "--path", "/live/abc123", "--socket"])
        .arg(&socket)
        .assert()
        .success();

    let err_log = dir.join("logs/live__abc123--Twitch.err.log");
    wait_for_content(&err_log, "frame");

    Command::new(assert_cmd::cargo::cargo_bin!("srelay"))
        .args(["notify", "stopped", "--app", "live", "--name", "abc123", "--config"])
        .arg(&config_path)
        .assert()
        .success();
    wait_for_content(&err_log, "=== relay ended");

    signal::kill(Pid::from_raw(supervisor.id() as i32), Signal::SIGTERM)
        .expect("failed to signal supervisor");
    let deadline = Instant::now() + Duration::from_secs(5);
    let status = loop {
        if let Some(status) = supervisor.try_wait().expect("failed to poll supervisor") {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = supervisor.kill();
            panic!("supervisor did not exit after SIGTERM");
        }
        thread::sleep(Duration::from_millis(50));
    };

    assert!(status.success());
    assert!(!socket.exists());
    assert!(
        fs::read_to_string(&err_log)
            .expect("log readable")
            .contains("got signal")
    );
}

#[test]
fn notify_without_supervisor_fails() {
    let temp = tempdir().expect("failed to create tempdir");
    let socket = temp.path().join("absent.sock");

    Command::new(assert_cmd::cargo::cargo_bin!("srelay"))
        .args(["notify", "started", "--path", "/live/abc123", "--socket"])
        .arg(&socket)
        .assert()
        .failure()
        .stdout(predicates::str::contains("No running srelay supervisor"));
}
