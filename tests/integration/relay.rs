#[path = "common/mod.rs"]
mod common;

use std::{fs, time::Duration};

use common::{CHATTY_ENCODER, SEGMENTING_ENCODER, drive, drive_until_content, fake_encoder};
use nix::sys::signal::Signal;
use streamrelay::{
    config::load_config,
    constants::SHUTDOWN_GRACE,
    launcher::EncoderLauncher,
    stream::{RelayTarget, StreamIdentity},
    supervisor::Supervisor,
};
use tempfile::tempdir;

fn identity() -> StreamIdentity {
    StreamIdentity::from_path("/live/abc123").expect("valid path")
}

#[tokio::test]
async fn relays_run_the_encoder_and_stop_gracefully() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let encoder = fake_encoder(dir, CHATTY_ENCODER);
    let config_path = common::write_config(
        dir,
        &format!(
            r#"version: "1"
encoder:
  program: {}
destinations:
  - name: Twitch
    url: rtmp://twitch.example/app/key1
  - name: YouTube
    url: rtmp://youtube.example/app/key2
"#,
            encoder.display()
        ),
    );
    let config = load_config(Some(config_path.to_str().unwrap())).expect("config loads");
    let mut supervisor = Supervisor::new(config, EncoderLauncher);

    supervisor.start_stream(&identity());
    drive(&mut supervisor, Duration::from_millis(1200)).await;
    assert_eq!(
        supervisor.running_targets(&identity()),
        vec![
            RelayTarget::Destination("Twitch".into()),
            RelayTarget::Destination("YouTube".into()),
        ]
    );

    let twitch_log = dir.join("logs/live__abc123--Twitch.err.log");
    let content = drive_until_content(&mut supervisor, &twitch_log, "frame").await;
    assert!(content.contains("-re -i rtmp://127.0.0.1:1935/live/abc123"));
    assert!(content.contains("-f flv"));
    assert!(content.contains("rtmp://twitch.example/app/key1"));

    assert!(supervisor.stop_stream(&identity()));
    drive(&mut supervisor, Duration::from_secs(2)).await;
    assert_eq!(supervisor.live_relays(), 0);

    let content = fs::read_to_string(&twitch_log).expect("log readable");
    assert!(content.contains("got signal"));
    assert!(content.contains("=== relay ended: exit code 0 ==="));
    assert!(dir.join("logs/live__abc123--YouTube.out.log").exists());
}

#[tokio::test]
async fn shutdown_removes_segmented_output() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let encoder = fake_encoder(dir, SEGMENTING_ENCODER);
    let config_path = common::write_config(
        dir,
        &format!(
            r#"version: "1"
encoder:
  program: {}
segmentation:
  enabled: true
  output_dir: media
"#,
            encoder.display()
        ),
    );
    let config = load_config(Some(config_path.to_str().unwrap())).expect("config loads");
    let mut supervisor = Supervisor::new(config, EncoderLauncher);

    supervisor.start_stream(&identity());
    let playlist = dir.join("media/live__abc123/index.m3u8");
    drive_until_content(&mut supervisor, &playlist, "#EXTM3U").await;
    assert_eq!(
        supervisor.running_targets(&identity()),
        vec![RelayTarget::Segmenter]
    );

    supervisor.shutdown_all(Signal::SIGTERM);
    assert!(!dir.join("media/live__abc123").exists());
    supervisor.drain(SHUTDOWN_GRACE).await;
    assert_eq!(supervisor.live_relays(), 0);
}

#[tokio::test]
async fn missing_encoder_is_logged_and_not_retried() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let config_path = common::write_config(
        dir,
        r#"version: "1"
encoder:
  program: /nonexistent/ffmpeg
destinations:
  - name: Twitch
    url: rtmp://twitch.example/app/key1
    auto_reconnect: true
"#,
    );
    let config = load_config(Some(config_path.to_str().unwrap())).expect("config loads");
    let mut supervisor = Supervisor::new(config, EncoderLauncher);

    supervisor.start_stream(&identity());
    assert!(!supervisor.is_active(&identity()));
    assert_eq!(supervisor.live_relays(), 0);

    let err_log = fs::read_to_string(dir.join("logs/live__abc123--Twitch.err.log"))
        .expect("error log written");
    assert!(err_log.contains("Spawn error:"));
}
