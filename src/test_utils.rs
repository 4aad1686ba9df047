//! Helpers shared by unit and integration tests.
use std::{
    collections::{HashMap, HashSet},
    io,
    path::Path,
    sync::{Arc, Mutex, MutexGuard, OnceLock},
};

use futures::FutureExt;
use nix::sys::signal::Signal;
use tokio::{
    io::{AsyncWriteExt, DuplexStream},
    sync::oneshot,
    time::Instant,
};

use crate::{
    config::{Destination, EncoderConfig, IngestConfig, RelayConfig, SegmentationConfig},
    constants::LOG_NAME_SEPARATOR,
    launcher::{LaunchCommand, LaunchedProcess, Launcher, ProcessExit, Signaller},
};

/// Global lock for environment variable modifications in tests.
/// All tests that modify environment variables (especially HOME) should acquire this lock
/// to prevent race conditions between parallel test executions.
pub static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Capture label the supervisor gives to `target` of `stream_key`.
pub fn label(stream_key: &str, target: &str) -> String {
    format!("{stream_key}{LOG_NAME_SEPARATOR}{target}")
}

/// An enabled destination with the watchdog on and reconnect off.
pub fn destination(name: &str) -> Destination {
    Destination {
        name: name.to_string(),
        url: format!("rtmp://dest.example/app/{name}"),
        enabled: true,
        watchdog: true,
        auto_reconnect: false,
    }
}

/// Configuration writing logs and segments below `root`.
pub fn relay_config(root: &Path, destinations: Vec<Destination>) -> RelayConfig {
    RelayConfig {
        version: "1".into(),
        log_dir: root.join("logs"),
        encoder: EncoderConfig::default(),
        ingest: IngestConfig::default(),
        segmentation: SegmentationConfig {
            output_dir: root.join("media"),
            ..Default::default()
        },
        destinations,
        project_dir: Some(root.to_path_buf()),
    }
}

/// One call to [`Launcher::launch`] seen by a [`FakeLauncher`].
#[derive(Debug, Clone)]
pub struct LaunchRecord {
    pub label: String,
    pub command: LaunchCommand,
    pub at: Instant,
}

struct FakeProcess {
    pid: u32,
    stdout: DuplexStream,
    stderr: DuplexStream,
    exit: oneshot::Sender<ProcessExit>,
}

#[derive(Default)]
struct FakeState {
    next_pid: u32,
    launches: Vec<LaunchRecord>,
    failing: HashSet<String>,
    running: HashMap<String, FakeProcess>,
    signals: HashMap<String, Vec<Signal>>,
}

impl FakeState {
    /// Ends the live process for `label`, if `pid` still refers to it.
    fn finish(&mut self, label: &str, pid: Option<u32>, exit: ProcessExit) -> bool {
        let matches = self
            .running
            .get(label)
            .is_some_and(|process| pid.is_none_or(|pid| process.pid == pid));
        if !matches {
            return false;
        }
        match self.running.remove(label) {
            // Dropping the pipe ends closes the reader side.
            Some(process) => process.exit.send(exit).is_ok(),
            None => false,
        }
    }
}

/// In-memory [`Launcher`]: processes are pipes plus an exit channel, addressed by
/// launch label. Any signal terminates a fake process.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    state: Arc<Mutex<FakeState>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes every later launch of `label` fail with `NotFound`.
    pub fn fail(&self, label: &str) {
        self.state().failing.insert(label.to_string());
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.state().launches.clone()
    }

    pub fn launch_count(&self, label: &str) -> usize {
        self.state()
            .launches
            .iter()
            .filter(|record| record.label == label)
            .count()
    }

    pub fn is_running(&self, label: &str) -> bool {
        self.state().running.contains_key(label)
    }

    pub fn running_count(&self) -> usize {
        self.state().running.len()
    }

    /// Signals delivered to `label`, across all of its launches.
    pub fn signals(&self, label: &str) -> Vec<Signal> {
        self.state()
            .signals
            .get(label)
            .cloned()
            .unwrap_or_default()
    }

    pub fn emit_stdout(&self, label: &str, data: &[u8]) {
        self.emit(label, data, false);
    }

    pub fn emit_stderr(&self, label: &str, data: &[u8]) {
        self.emit(label, data, true);
    }

    fn emit(&self, label: &str, data: &[u8], to_stderr: bool) {
        let mut state = self.state();
        if let Some(process) = state.running.get_mut(label) {
            let pipe = if to_stderr {
                &mut process.stderr
            } else {
                &mut process.stdout
            };
            // Pipes are sized so small writes complete without waiting for the reader.
            let _ = pipe.write_all(data).now_or_never();
        }
    }

    /// Ends the live process for `label` with an exit code.
    pub fn exit(&self, label: &str, code: i32) -> bool {
        self.state().finish(
            label,
            None,
            ProcessExit {
                code: Some(code),
                signal: None,
            },
        )
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self, command: &LaunchCommand) -> io::Result<LaunchedProcess> {
        let mut state = self.state();
        state.launches.push(LaunchRecord {
            label: command.label.clone(),
            command: command.clone(),
            at: Instant::now(),
        });
        if state.failing.contains(&command.label) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: no such file", command.program.display()),
            ));
        }

        state.next_pid += 1;
        let pid = 10_000 + state.next_pid;
        let (stdout_writer, stdout_reader) = tokio::io::duplex(64 * 1024);
        let (stderr_writer, stderr_reader) = tokio::io::duplex(64 * 1024);
        let (exit_tx, exit_rx) = oneshot::channel();
        state.running.insert(
            command.label.clone(),
            FakeProcess {
                pid,
                stdout: stdout_writer,
                stderr: stderr_writer,
                exit: exit_tx,
            },
        );

        Ok(LaunchedProcess {
            pid,
            stdout: Box::new(stdout_reader),
            stderr: Box::new(stderr_reader),
            exit: Box::pin(async move {
                exit_rx
                    .await
                    .map_err(|_| io::Error::other("fake process abandoned"))
            }),
            signaller: Box::new(FakeSignaller {
                state: Arc::clone(&self.state),
                label: command.label.clone(),
                pid,
            }),
        })
    }
}

struct FakeSignaller {
    state: Arc<Mutex<FakeState>>,
    label: String,
    pid: u32,
}

impl Signaller for FakeSignaller {
    fn signal(&self, signal: Signal) -> io::Result<()> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !state
            .running
            .get(&self.label)
            .is_some_and(|process| process.pid == self.pid)
        {
            return Ok(());
        }
        state
            .signals
            .entry(self.label.clone())
            .or_default()
            .push(signal);
        state.finish(
            &self.label,
            Some(self.pid),
            ProcessExit {
                code: None,
                signal: Some(signal as i32),
            },
        );
        Ok(())
    }
}
