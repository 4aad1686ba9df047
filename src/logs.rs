//! Per-relay capture logs.
//!
//! Each (stream, target) pair owns two append-only files under the configured log
//! directory: `<stream key>--<target>.out.log` and `<stream key>--<target>.err.log`.
use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use tracing::warn;

use crate::{
    constants::{LOG_NAME_SEPARATOR, STDERR_LOG_SUFFIX, STDOUT_LOG_SUFFIX},
    error::LogsError,
    stream::{RelayTarget, StreamIdentity},
};

/// Which capture stream a log line came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogKind {
    /// Standard output logs
    Stdout,
    /// Standard error logs (where ffmpeg reports progress)
    #[default]
    Stderr,
}

impl LogKind {
    /// String representation for display and CLI parsing.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Stdout => "stdout",
            LogKind::Stderr => "stderr",
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            LogKind::Stdout => STDOUT_LOG_SUFFIX,
            LogKind::Stderr => STDERR_LOG_SUFFIX,
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stdout" | "out" => Ok(LogKind::Stdout),
            "stderr" | "err" => Ok(LogKind::Stderr),
            _ => Err(format!(
                "invalid log kind '{}', must be one of: stdout, stderr",
                s
            )),
        }
    }
}

/// Path of the capture file for `stream_key` / `target`.
pub fn log_path(log_dir: &Path, stream_key: &str, target: &str, kind: LogKind) -> PathBuf {
    log_dir.join(format!(
        "{stream_key}{LOG_NAME_SEPARATOR}{target}.{}",
        kind.suffix()
    ))
}

/// Append-only output/error capture for one relay process.
#[derive(Debug)]
pub struct LogSink {
    label: String,
    stdout: Option<File>,
    stderr: Option<File>,
    write_failed: bool,
}

impl LogSink {
    /// Opens (creating if needed) the capture pair for a relay and writes a session banner.
    pub fn open(
        log_dir: &Path,
        stream: &StreamIdentity,
        target: &RelayTarget,
    ) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let open = |kind: LogKind| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path(log_dir, stream.key(), target.name(), kind))
        };

        let mut sink = Self {
            label: format!("{stream}{LOG_NAME_SEPARATOR}{target}"),
            stdout: Some(open(LogKind::Stdout)?),
            stderr: Some(open(LogKind::Stderr)?),
            write_failed: false,
        };

        let banner = format!(
            "=== relay {} started at {} ===",
            sink.label,
            chrono::Local::now().to_rfc3339()
        );
        sink.note(LogKind::Stdout, &banner);
        sink.note(LogKind::Stderr, &banner);
        Ok(sink)
    }

    /// Appends raw process output.
    pub fn write(&mut self, kind: LogKind, data: &[u8]) {
        let file = match kind {
            LogKind::Stdout => self.stdout.as_mut(),
            LogKind::Stderr => self.stderr.as_mut(),
        };

        if let Some(file) = file
            && let Err(err) = file.write_all(data)
            && !self.write_failed
        {
            warn!("Failed to write {kind} log for relay '{}': {err}", self.label);
            self.write_failed = true;
        }
    }

    /// Appends a supervisor-authored line.
    pub fn note(&mut self, kind: LogKind, message: &str) {
        self.write(kind, format!("{message}\n").as_bytes());
    }

    /// Flushes and releases both files. Later writes are dropped.
    pub fn close(&mut self) {
        for file in [self.stdout.take(), self.stderr.take()].into_iter().flatten() {
            let mut file = file;
            let _ = file.flush();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stdout.is_none() && self.stderr.is_none()
    }
}

/// Returns the last `lines` lines of a capture file.
///
/// ffmpeg output is not guaranteed to be UTF-8, so invalid sequences are replaced.
pub fn tail_lines(path: &Path, lines: usize) -> io::Result<Vec<String>> {
    let bytes = fs::read(path)?;
    let content = String::from_utf8_lossy(&bytes);
    let all_lines: Vec<&str> = content.lines().collect();
    let start = all_lines.len().saturating_sub(lines);
    Ok(all_lines[start..].iter().map(|l| l.to_string()).collect())
}

/// Reads and displays the last `lines` lines of a relay's capture log.
pub fn show_logs(
    log_dir: &Path,
    stream: &StreamIdentity,
    target: &str,
    kind: LogKind,
    lines: usize,
) -> Result<(), LogsError> {
    let path = log_path(log_dir, stream.key(), target, kind);
    if !path.exists() {
        return Err(LogsError::LogUnavailable {
            stream: stream.key().to_string(),
            target: target.to_string(),
            kind: kind.to_string(),
        });
    }

    for line in tail_lines(&path, lines)? {
        println!("{}", line);
    }

    Ok(())
}
