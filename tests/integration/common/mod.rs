#![allow(dead_code)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use streamrelay::{launcher::Launcher, supervisor::Supervisor};

/// Writes an executable `sh` script standing in for the encoder.
pub fn fake_encoder(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-ffmpeg");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("failed to write fake encoder");
    let mut permissions = fs::metadata(&path)
        .expect("failed to stat fake encoder")
        .permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(&path, permissions).expect("failed to chmod fake encoder");
    path
}

/// Encoder that logs its arguments, reports progress on stderr and exits cleanly on
/// SIGINT or SIGTERM.
pub const CHATTY_ENCODER: &str = r#"
echo "args: $*" >&2
trap 'echo "got signal" >&2; exit 0' INT TERM
while true; do
  echo "frame" >&2
  sleep 0.1
done
"#;

/// Encoder that writes a playlist to its last argument, then idles until signalled.
pub const SEGMENTING_ENCODER: &str = r##"
for last; do :; done
echo "#EXTM3U" > "$last"
trap 'exit 0' INT TERM
while true; do
  sleep 0.1
done
"##;

pub fn write_config(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("srelay.yaml");
    fs::write(&path, body).expect("failed to write config");
    path
}

pub fn wait_for_path(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        thread::sleep(Duration::from_millis(50));
    }
    panic!("Timed out waiting for {:?} to exist", path);
}

pub fn wait_for_content(path: &Path, needle: &str) -> String {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(content) = fs::read_to_string(path)
            && content.contains(needle)
        {
            return content;
        }

        if Instant::now() >= deadline {
            panic!("Timed out waiting for '{needle}' in {:?}", path);
        }

        thread::sleep(Duration::from_millis(50));
    }
}

/// Dispatches supervisor events for `duration` of real time.
pub async fn drive<L: Launcher>(supervisor: &mut Supervisor<L>, duration: Duration) {
    let deadline = tokio::time::Instant::now() + duration;
    while let Ok(event) = tokio::time::timeout_at(deadline, supervisor.next_event()).await {
        supervisor.dispatch(event);
    }
}

/// Keeps the supervisor running until `path` contains `needle`.
pub async fn drive_until_content<L: Launcher>(
    supervisor: &mut Supervisor<L>,
    path: &Path,
    needle: &str,
) -> String {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(content) = fs::read_to_string(path)
            && content.contains(needle)
        {
            return content;
        }

        if Instant::now() >= deadline {
            panic!("Timed out waiting for '{needle}' in {:?}", path);
        }

        drive(supervisor, Duration::from_millis(50)).await;
    }
}
