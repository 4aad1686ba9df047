//! streamrelay supervises the ffmpeg relay processes that mirror one live stream to
//! many destinations. It reacts to publish notifications from an ingest server, starts
//! one relay per destination (plus optional local HLS segmentation), watches them for
//! stalls, reconnects them when configured to, and cleans up after the stream ends.

/// Lifecycle event bridge: notifications, signals and the supervisor loop.
pub mod bridge;

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Constants and fixed timings.
pub mod constants;

/// Error handling.
pub mod error;

/// Subprocess handles and the stall watchdog.
pub mod handle;

/// Notification socket.
pub mod ipc;

/// Encoder invocation and the process launcher.
pub mod launcher;

/// Relay capture logs.
pub mod logs;

/// Per-stream relay management.
pub mod manager;

/// Active stream registry.
pub mod registry;

/// Delayed-task queue.
pub mod scheduler;

/// Segmented output directories.
pub mod segment;

/// Stream identities and relay targets.
pub mod stream;

/// Supervisor state and event dispatch.
pub mod supervisor;

/// Shared test helpers.
#[cfg(test)]
pub mod test_utils;
