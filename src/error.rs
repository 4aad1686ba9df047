//! Error handling for streamrelay.
use thiserror::Error;

/// Defines all errors surfaced by the relay supervisor.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Error reading or accessing a configuration file.
    #[error("Failed to read config file: {0}")]
    ConfigReadError(#[source] std::io::Error),

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    ConfigParseError(#[from] serde_yaml::Error),

    /// The configuration parsed but describes an unusable setup.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A `${VAR}` reference in the configuration has no value in the environment.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the unset variable.
        name: String,
    },

    /// The encoder executable could not be launched for a relay target.
    #[error("Failed to start relay '{target}' for stream '{stream}': {source}")]
    SpawnError {
        /// Stream key the relay belongs to.
        stream: String,
        /// Target name (destination name or the segmentation target).
        target: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// A lifecycle notification did not carry enough context to derive a stream identity.
    #[error("Could not determine stream path for '{event}' notification")]
    UnresolvedStreamIdentity {
        /// Which notification was received.
        event: String,
    },

    /// Notification socket failure.
    #[error(transparent)]
    Control(#[from] ControlError),

    /// Generic I/O failure outside configuration loading.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the notification socket helpers.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("notification socket I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialise notification: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("HOME environment variable not set")]
    MissingHome,
    #[error("supervisor reported error: {0}")]
    Server(String),
    #[error("notification socket not available at {0}")]
    NotAvailable(String),
}

/// Error type for reading relay capture logs.
#[derive(Debug, Error)]
pub enum LogsError {
    /// No capture file exists for the requested stream and target.
    #[error("No {kind} log for target '{target}' of stream '{stream}'")]
    LogUnavailable {
        /// Stream key looked up.
        stream: String,
        /// Target name looked up.
        target: String,
        /// Which capture file was requested.
        kind: String,
    },

    /// Error reading the log file.
    #[error("Failed to read log: {0}")]
    Read(#[from] std::io::Error),
}
