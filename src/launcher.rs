//! Encoder invocation: argument templates and the process launcher.
//!
//! The supervisor never touches `tokio::process` directly. It asks a [`Launcher`] for a
//! [`LaunchedProcess`], which bundles the captured pipes, a future resolving on exit and
//! a way to deliver signals while that future is pending.
use std::{
    fmt, io,
    os::unix::process::ExitStatusExt,
    path::PathBuf,
    process::{ExitStatus, Stdio},
};

use futures::future::BoxFuture;
use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use tokio::{io::AsyncRead, process::Command};
use tracing::debug;

use crate::{
    config::{EncoderConfig, SegmentationConfig},
    segment::SegmentLayout,
};

/// A fully resolved encoder invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    /// `<stream key>--<target>`, used in diagnostics.
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl LaunchCommand {
    /// Push relay: realtime read of `input`, stream copy, FLV to `url`.
    pub fn relay(label: String, encoder: &EncoderConfig, input: &str, url: &str) -> Self {
        let mut args = Self::input_args(encoder, input);
        args.extend(
            ["-f", "flv", "-bufsize", encoder.bufsize.as_str(), url]
                .iter()
                .map(|s| s.to_string()),
        );

        Self {
            label,
            program: encoder.program.clone(),
            args,
        }
    }

    /// Local HLS output: realtime read of `input`, stream copy, rolling segment window.
    /// Segments that leave the window are deleted by the encoder itself.
    pub fn segmenter(
        label: String,
        encoder: &EncoderConfig,
        input: &str,
        segmentation: &SegmentationConfig,
        layout: &SegmentLayout,
    ) -> Self {
        let mut args = Self::input_args(encoder, input);
        args.extend([
            "-f".to_string(),
            "hls".to_string(),
            "-hls_time".to_string(),
            segmentation.segment_duration.to_string(),
            "-hls_list_size".to_string(),
            segmentation.playlist_size.to_string(),
            "-hls_flags".to_string(),
            "delete_segments".to_string(),
            "-hls_segment_filename".to_string(),
            layout.segment_pattern().to_string_lossy().into_owned(),
            layout.playlist().to_string_lossy().into_owned(),
        ]);

        Self {
            label,
            program: encoder.program.clone(),
            args,
        }
    }

    fn input_args(encoder: &EncoderConfig, input: &str) -> Vec<String> {
        [
            "-hide_banner",
            "-loglevel",
            encoder.loglevel.as_str(),
            "-re",
            "-i",
            input,
            "-c:v",
            "copy",
            "-c:a",
            "copy",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// How a relay process ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code if the process terminated normally.
    pub code: Option<i32>,
    /// Signal number if the process was terminated by a signal.
    pub signal: Option<i32>,
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

/// Delivers signals to a launched process.
pub trait Signaller: Send + Sync {
    fn signal(&self, signal: Signal) -> io::Result<()>;
}

/// A running relay process as seen by its handle.
pub struct LaunchedProcess {
    pub pid: u32,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub stderr: Box<dyn AsyncRead + Send + Unpin>,
    /// Resolves once the process has been reaped.
    pub exit: BoxFuture<'static, io::Result<ProcessExit>>,
    pub signaller: Box<dyn Signaller>,
}

/// Starts encoder processes.
pub trait Launcher {
    fn launch(&self, command: &LaunchCommand) -> io::Result<LaunchedProcess>;
}

/// Launches the real encoder executable with tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncoderLauncher;

impl Launcher for EncoderLauncher {
    fn launch(&self, command: &LaunchCommand) -> io::Result<LaunchedProcess> {
        debug!("Launching relay {}: {command}", command.label);

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Own process group: terminal signals reach the supervisor, which forwards them.
            .process_group(0);

        let mut child = cmd.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("relay exited before its pid was recorded"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("relay stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("relay stderr was not captured"))?;

        Ok(LaunchedProcess {
            pid,
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            exit: Box::pin(async move { child.wait().await.map(ProcessExit::from) }),
            signaller: Box::new(PidSignaller(Pid::from_raw(pid as i32))),
        })
    }
}

struct PidSignaller(Pid);

impl Signaller for PidSignaller {
    fn signal(&self, sig: Signal) -> io::Result<()> {
        match signal::kill(self.0, sig) {
            // Already gone; the exit future reports it.
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(err) => Err(io::Error::from_raw_os_error(err as i32)),
        }
    }
}
