//! Subprocess handles: one relay process, its output capture and its stall watchdog.
//!
//! Each handle runs as its own task on the supervisor's runtime. The task owns the
//! process pipes and the [`LogSink`]; the manager keeps a [`RelayHandle`], which is only
//! an id plus a channel for requesting signals. When the process ends, the task closes
//! the sink and reports a [`HandleEvent`] exactly once.
use std::{fmt, time::Duration};

use nix::sys::signal::Signal;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
    time::{self, Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    constants::{LOG_BUFFER_SIZE, OUTPUT_DRAIN_TIMEOUT, STALL_THRESHOLD, WATCHDOG_INTERVAL},
    error::RelayError,
    launcher::{LaunchCommand, LaunchedProcess, Launcher, ProcessExit, Signaller},
    logs::{LogKind, LogSink},
    stream::{RelayTarget, StreamIdentity},
};

type Reader = Box<dyn AsyncRead + Send + Unpin>;

/// Identifies one spawn of a relay. A restarted target gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stall detection settings for one handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogPolicy {
    /// Time between inactivity checks.
    pub interval: Duration,
    /// Silence longer than this is a stall.
    pub threshold: Duration,
}

impl Default for WatchdogPolicy {
    fn default() -> Self {
        Self {
            interval: WATCHDOG_INTERVAL,
            threshold: STALL_THRESHOLD,
        }
    }
}

/// How a handle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub exit: ProcessExit,
    /// Set when the watchdog killed the process.
    pub forced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Stalled,
    Exited(i32),
    Signaled(i32),
    Unknown,
}

impl ExitOutcome {
    pub fn reason(&self) -> ExitReason {
        if self.forced {
            return ExitReason::Stalled;
        }
        match (self.exit.code, self.exit.signal) {
            (_, Some(signal)) => ExitReason::Signaled(signal),
            (Some(code), None) => ExitReason::Exited(code),
            (None, None) => ExitReason::Unknown,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Stalled => write!(f, "killed after stalling"),
            ExitReason::Exited(code) => write!(f, "exit code {code}"),
            ExitReason::Signaled(signal) => write!(f, "signal {signal}"),
            ExitReason::Unknown => write!(f, "unknown status"),
        }
    }
}

/// Exit report delivered to the supervisor loop.
#[derive(Debug, Clone)]
pub struct HandleEvent {
    pub identity: StreamIdentity,
    pub target: RelayTarget,
    pub id: HandleId,
    pub outcome: ExitOutcome,
}

/// Manager-side view of a running relay.
#[derive(Debug)]
pub struct RelayHandle {
    id: HandleId,
    target: RelayTarget,
    pid: u32,
    control: mpsc::UnboundedSender<Signal>,
}

/// What a relay's supervising task owns besides the process itself.
pub struct HandleSpec {
    pub id: HandleId,
    pub identity: StreamIdentity,
    pub target: RelayTarget,
    pub sink: LogSink,
    pub watchdog: Option<WatchdogPolicy>,
    pub events: mpsc::UnboundedSender<HandleEvent>,
}

impl RelayHandle {
    /// Launches `command` and starts supervising it.
    ///
    /// A launch failure is written to the target's error log and returned; no event
    /// is reported for a handle that never started.
    pub fn spawn<L: Launcher + ?Sized>(
        mut spec: HandleSpec,
        command: &LaunchCommand,
        launcher: &L,
    ) -> Result<Self, RelayError> {
        let process = match launcher.launch(command) {
            Ok(process) => process,
            Err(source) => {
                spec.sink.note(LogKind::Stderr, &format!("Spawn error: {source}"));
                spec.sink.close();
                return Err(RelayError::SpawnError {
                    stream: spec.identity.key().to_string(),
                    target: spec.target.name().to_string(),
                    source,
                });
            }
        };

        let pid = process.pid;
        let (control, control_rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: spec.id,
            target: spec.target.clone(),
            pid,
            control,
        };
        debug!(
            "Relay '{}' for stream '{}' running as pid {pid} ({})",
            spec.target, spec.identity, spec.id
        );
        tokio::spawn(spec.supervise(process, control_rx));
        Ok(handle)
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn target(&self) -> &RelayTarget {
        &self.target
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Asks the process to shut down. Returns `false` if the handle already finished.
    pub fn terminate(&self, signal: Signal) -> bool {
        self.control.send(signal).is_ok()
    }
}

impl HandleSpec {
    async fn supervise(
        mut self,
        process: LaunchedProcess,
        mut control: mpsc::UnboundedReceiver<Signal>,
    ) {
        let LaunchedProcess {
            stdout,
            stderr,
            mut exit,
            signaller,
            ..
        } = process;
        let mut stdout = Some(stdout);
        let mut stderr = Some(stderr);
        let mut out_buf = vec![0u8; LOG_BUFFER_SIZE];
        let mut err_buf = vec![0u8; LOG_BUFFER_SIZE];

        let mut last_activity = Instant::now();
        let mut ticker = self.watchdog.map(|policy| {
            let mut ticker = time::interval_at(Instant::now() + policy.interval, policy.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut control_open = true;
        let mut forced = false;

        let status = loop {
            tokio::select! {
                status = &mut exit => break status,
                read = read_chunk(stdout.as_mut(), &mut out_buf), if stdout.is_some() => match read {
                    Some(n) => {
                        last_activity = Instant::now();
                        self.sink.write(LogKind::Stdout, &out_buf[..n]);
                    }
                    None => stdout = None,
                },
                read = read_chunk(stderr.as_mut(), &mut err_buf), if stderr.is_some() => match read {
                    Some(n) => {
                        last_activity = Instant::now();
                        self.sink.write(LogKind::Stderr, &err_buf[..n]);
                    }
                    None => stderr = None,
                },
                _ = tick(ticker.as_mut()), if ticker.is_some() && !forced => {
                    if let Some(policy) = self.watchdog
                        && last_activity.elapsed() > policy.threshold
                    {
                        self.kill_stalled(signaller.as_ref(), last_activity.elapsed());
                        forced = true;
                    }
                },
                signal = control.recv(), if control_open => match signal {
                    Some(signal) => self.deliver(signaller.as_ref(), signal),
                    // Dropping the handle detaches it; the process keeps running.
                    None => control_open = false,
                },
            }
        };

        let exit = match status {
            Ok(exit) => exit,
            Err(err) => {
                error!(
                    "Failed to wait for relay '{}' of stream '{}': {err}",
                    self.target, self.identity
                );
                ProcessExit::default()
            }
        };

        drain(&mut self.sink, stdout, stderr, &mut out_buf, &mut err_buf).await;

        let outcome = ExitOutcome { exit, forced };
        let reason = outcome.reason();
        match reason {
            ExitReason::Exited(0) => info!(
                "Relay '{}' for stream '{}' exited cleanly",
                self.target, self.identity
            ),
            _ => warn!(
                "Relay '{}' for stream '{}' ended: {reason}",
                self.target, self.identity
            ),
        }
        self.sink
            .note(LogKind::Stderr, &format!("=== relay ended: {reason} ==="));
        self.sink.close();

        let _ = self.events.send(HandleEvent {
            identity: self.identity,
            target: self.target,
            id: self.id,
            outcome,
        });
    }

    fn kill_stalled(&mut self, signaller: &dyn Signaller, silent_for: Duration) {
        warn!(
            "Relay '{}' for stream '{}' produced no output for {}s; killing it",
            self.target,
            self.identity,
            silent_for.as_secs()
        );
        self.sink.note(
            LogKind::Stderr,
            &format!(
                "=== watchdog: no output for {}s, sending SIGKILL ===",
                silent_for.as_secs()
            ),
        );
        if let Err(err) = signaller.signal(Signal::SIGKILL) {
            error!(
                "Failed to kill stalled relay '{}' of stream '{}': {err}",
                self.target, self.identity
            );
        }
    }

    fn deliver(&self, signaller: &dyn Signaller, signal: Signal) {
        debug!(
            "Sending {signal} to relay '{}' of stream '{}'",
            self.target, self.identity
        );
        if let Err(err) = signaller.signal(signal) {
            warn!(
                "Failed to send {signal} to relay '{}' of stream '{}': {err}",
                self.target, self.identity
            );
        }
    }
}

/// Reads one chunk. `None` on end of stream or read failure.
async fn read_chunk(reader: Option<&mut Reader>, buf: &mut [u8]) -> Option<usize> {
    match reader?.read(buf).await {
        Ok(0) | Err(_) => None,
        Ok(n) => Some(n),
    }
}

async fn tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Copies whatever output is still buffered after exit, bounded by [`OUTPUT_DRAIN_TIMEOUT`].
/// A descendant holding the pipes open must not keep the handle alive.
async fn drain(
    sink: &mut LogSink,
    mut stdout: Option<Reader>,
    mut stderr: Option<Reader>,
    out_buf: &mut [u8],
    err_buf: &mut [u8],
) {
    let copy = async {
        loop {
            tokio::select! {
                read = read_chunk(stdout.as_mut(), out_buf), if stdout.is_some() => match read {
                    Some(n) => sink.write(LogKind::Stdout, &out_buf[..n]),
                    None => stdout = None,
                },
                read = read_chunk(stderr.as_mut(), err_buf), if stderr.is_some() => match read {
                    Some(n) => sink.write(LogKind::Stderr, &err_buf[..n]),
                    None => stderr = None,
                },
                else => break,
            }
        }
    };
    let _ = time::timeout(OUTPUT_DRAIN_TIMEOUT, copy).await;
}
