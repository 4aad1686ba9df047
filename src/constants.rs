//! Constants and fixed timing values for the relay supervisor.
//!
//! Everything the supervisor schedules is driven by the durations below; none of them
//! are exposed through the configuration file.

use std::time::Duration;

// ============================================================================
// Relay Scheduling
// ============================================================================

/// Gap between consecutive destination starts for one stream.
/// Destination `i` (0-indexed, among enabled destinations) starts `i * STAGGER_INTERVAL`
/// after the stream-started notification.
pub const STAGGER_INTERVAL: Duration = Duration::from_millis(500);

/// Delay before an auto-reconnecting destination is started again.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

// ============================================================================
// Stall Watchdog
// ============================================================================

/// How often a watchdog-enabled relay checks for output inactivity.
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);

/// A relay that has been silent for longer than this is killed with SIGKILL.
pub const STALL_THRESHOLD: Duration = Duration::from_secs(30);

// ============================================================================
// Segmented Output
// ============================================================================

/// Grace period between stopping segmentation and deleting its output directory.
/// Readers that already fetched the playlist can finish the final window.
pub const SEGMENT_CLEANUP_DELAY: Duration = Duration::from_secs(30);

/// Name of the HLS manifest written inside each stream's output directory.
pub const PLAYLIST_FILE_NAME: &str = "index.m3u8";

/// Segment file name template handed to the encoder.
pub const SEGMENT_FILE_PATTERN: &str = "segment_%05d.ts";

/// Target name reserved for the local segmentation relay.
pub const SEGMENTER_TARGET_NAME: &str = "hls";

// ============================================================================
// Shutdown
// ============================================================================

/// Upper bound on how long the supervisor waits for relays after a termination signal.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// How long a finished relay's remaining pipe output is drained into its log sink.
pub const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

// ============================================================================
// Logging and Output Constants
// ============================================================================

/// Buffer size for reading relay stdout/stderr.
pub const LOG_BUFFER_SIZE: usize = 8192;

/// Suffix of the capture file holding a relay's standard output.
pub const STDOUT_LOG_SUFFIX: &str = "out.log";

/// Suffix of the capture file holding a relay's standard error.
pub const STDERR_LOG_SUFFIX: &str = "err.log";

/// Separator between stream key and target name in capture file names.
pub const LOG_NAME_SEPARATOR: &str = "--";

// ============================================================================
// Defaults
// ============================================================================

/// Config file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "srelay.yaml";

/// Encoder executable used when the configuration does not name one.
pub const DEFAULT_ENCODER_PROGRAM: &str = "/usr/bin/ffmpeg";

/// Base URL the encoder reads the ingested stream from.
pub const DEFAULT_INPUT_BASE: &str = "rtmp://127.0.0.1:1935";

/// Application namespace assumed for single-segment publish paths.
pub const DEFAULT_APP: &str = "live";

/// How long a notification connection may take to deliver its request line.
pub const NOTIFICATION_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// File name of the notification socket inside the runtime directory.
pub const SOCKET_FILE_NAME: &str = "srelay.sock";
