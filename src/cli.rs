//! Command-line interface for srelay.
use clap::{Parser, Subcommand, ValueEnum};
use strum_macros::IntoStaticStr;

use crate::{bridge::IngestEvent, constants::DEFAULT_CONFIG_FILE, logs::LogKind};

/// Verbosity accepted by `--log-level`, used as the `EnvFilter` directive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Off,
    #[value(alias = "err")]
    Error,
    #[value(alias = "warning")]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Command-line interface for srelay.
#[derive(Parser)]
#[command(name = "srelay", version, author)]
#[command(
    about = "Mirrors live streams to many destinations with supervised ffmpeg relays",
    long_about = None
)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true, ignore_case = true)]
    pub log_level: Option<LogLevel>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for srelay.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the relay supervisor in the foreground.
    Run {
        /// Path to the configuration file (defaults to `srelay.yaml`).
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,
    },

    /// Tell a running supervisor that a stream started or stopped.
    Notify {
        /// Lifecycle event: `started` or `stopped`.
        event: IngestEvent,

        /// Full publish path of the stream, e.g. `/live/abc123`.
        #[arg(long, required_unless_present = "name", conflicts_with = "name")]
        path: Option<String>,

        /// Application namespace of `--name` (defaults to the supervisor's default app).
        #[arg(long, requires = "name")]
        app: Option<String>,

        /// Bare stream name.
        #[arg(long)]
        name: Option<String>,

        /// Notification socket of the supervisor.
        #[arg(long)]
        socket: Option<String>,

        /// Read the socket location from this configuration file.
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Show the capture log of one relay.
    Logs {
        /// Path to the configuration file (defaults to `srelay.yaml`).
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,

        /// Read logs from this directory instead of the configured one.
        #[arg(long)]
        log_dir: Option<String>,

        /// Publish path of the stream, e.g. `live/abc123`.
        #[arg(short, long)]
        stream: String,

        /// Destination name, or `hls` for segmentation.
        #[arg(short, long)]
        target: String,

        /// Number of lines to show (default: 50).
        #[arg(short, long, default_value = "50")]
        lines: usize,

        /// Kind of logs to show: stdout or stderr (default: stderr).
        #[arg(short = 'k', long, default_value_t = LogKind::default())]
        kind: LogKind,
    },
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
