//! Configuration management for streamrelay.
use regex::Regex;
use serde::Deserialize;
use std::{
    collections::HashSet,
    env, fs,
    path::{Path, PathBuf},
};

use crate::{
    constants::{
        DEFAULT_APP, DEFAULT_CONFIG_FILE, DEFAULT_ENCODER_PROGRAM, DEFAULT_INPUT_BASE,
        SEGMENTER_TARGET_NAME,
    },
    error::RelayError,
    stream::StreamIdentity,
};

/// Represents the structure of the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Configuration version.
    pub version: String,
    /// Directory receiving per-relay capture logs.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Encoder executable and its shared flags.
    #[serde(default)]
    pub encoder: EncoderConfig,
    /// Where the ingest server exposes published streams.
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Optional local HLS output.
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    /// Outbound destinations, in start order.
    #[serde(default)]
    pub destinations: Vec<Destination>,
    /// Directory the configuration was loaded from.
    #[serde(skip)]
    pub project_dir: Option<PathBuf>,
}

/// Encoder invocation settings shared by every relay.
#[derive(Debug, Clone, Deserialize)]
pub struct EncoderConfig {
    #[serde(default = "default_encoder_program")]
    pub program: PathBuf,
    /// Value passed to `-loglevel`.
    #[serde(default = "default_encoder_loglevel")]
    pub loglevel: String,
    /// Value passed to `-bufsize` for push relays.
    #[serde(default = "default_encoder_bufsize")]
    pub bufsize: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: default_encoder_program(),
            loglevel: default_encoder_loglevel(),
            bufsize: default_encoder_bufsize(),
        }
    }
}

/// Location of the ingest server and of the notification socket.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Base URL relays read the published stream from.
    #[serde(default = "default_input_base")]
    pub input_base: String,
    /// Application namespace for publish paths that consist of a bare stream name.
    #[serde(default = "default_app")]
    pub default_app: String,
    /// Notification socket path. Defaults to the runtime directory.
    #[serde(default)]
    pub socket: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            input_base: default_input_base(),
            default_app: default_app(),
            socket: None,
        }
    }
}

impl IngestConfig {
    /// URL a relay reads `identity` from.
    pub fn input_locator(&self, identity: &StreamIdentity) -> String {
        let base = self.input_base.trim_end_matches('/');
        if identity.path().contains('/') {
            format!("{base}/{}", identity.path())
        } else {
            format!("{base}/{}/{}", self.default_app, identity.path())
        }
    }
}

/// Local HLS segmentation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SegmentationConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Root directory; each stream writes into `<output_dir>/<stream key>/`.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Target segment length in seconds.
    #[serde(default = "default_segment_duration")]
    pub segment_duration: u32,
    /// Number of segments kept in the playlist window.
    #[serde(default = "default_playlist_size")]
    pub playlist_size: u32,
    #[serde(default = "enabled_by_default")]
    pub watchdog: bool,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output_dir: default_output_dir(),
            segment_duration: default_segment_duration(),
            playlist_size: default_playlist_size(),
            watchdog: true,
        }
    }
}

/// One outbound relay destination.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Destination {
    /// Unique name, used in log file names.
    pub name: String,
    /// Push URL handed to the encoder.
    pub url: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Kill the relay when it stops producing output.
    #[serde(default = "enabled_by_default")]
    pub watchdog: bool,
    /// Restart the relay after it exits while the stream is still live.
    #[serde(default)]
    pub auto_reconnect: bool,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_encoder_program() -> PathBuf {
    PathBuf::from(DEFAULT_ENCODER_PROGRAM)
}

fn default_encoder_loglevel() -> String {
    "info".into()
}

fn default_encoder_bufsize() -> String {
    "3000k".into()
}

fn default_input_base() -> String {
    DEFAULT_INPUT_BASE.into()
}

fn default_app() -> String {
    DEFAULT_APP.into()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("media")
}

fn default_segment_duration() -> u32 {
    2
}

fn default_playlist_size() -> u32 {
    6
}

fn enabled_by_default() -> bool {
    true
}

impl RelayConfig {
    /// Destinations that should be relayed to, in configuration order.
    pub fn enabled_destinations(&self) -> impl Iterator<Item = &Destination> {
        self.destinations.iter().filter(|d| d.enabled)
    }

    /// Looks up a destination by name.
    pub fn destination(&self, name: &str) -> Option<&Destination> {
        self.destinations.iter().find(|d| d.name == name)
    }

    /// Checks invariants the supervisor relies on.
    pub fn validate(&self) -> Result<(), RelayError> {
        let mut seen = HashSet::new();
        for destination in &self.destinations {
            let name = destination.name.trim();
            if name.is_empty() {
                return Err(RelayError::InvalidConfig(
                    "destination name cannot be empty".into(),
                ));
            }
            if name == SEGMENTER_TARGET_NAME {
                return Err(RelayError::InvalidConfig(format!(
                    "destination name '{SEGMENTER_TARGET_NAME}' is reserved for segmentation"
                )));
            }
            if name.contains('/') {
                return Err(RelayError::InvalidConfig(format!(
                    "destination name '{name}' cannot contain '/'"
                )));
            }
            if !seen.insert(name) {
                return Err(RelayError::InvalidConfig(format!(
                    "duplicate destination name '{name}'"
                )));
            }
            if destination.url.trim().is_empty() {
                return Err(RelayError::InvalidConfig(format!(
                    "destination '{name}' has no url"
                )));
            }
        }

        if self.segmentation.segment_duration == 0 {
            return Err(RelayError::InvalidConfig(
                "segmentation.segment_duration must be positive".into(),
            ));
        }
        if self.segmentation.playlist_size == 0 {
            return Err(RelayError::InvalidConfig(
                "segmentation.playlist_size must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Anchors relative directories at `base`.
    fn resolve_paths(&mut self, base: &Path) {
        if self.log_dir.is_relative() {
            self.log_dir = base.join(&self.log_dir);
        }
        if self.segmentation.output_dir.is_relative() {
            self.segmentation.output_dir = base.join(&self.segmentation.output_dir);
        }
        if let Some(socket) = &self.ingest.socket
            && socket.is_relative()
        {
            self.ingest.socket = Some(base.join(socket));
        }
        self.project_dir = Some(base.to_path_buf());
    }
}

/// Expands `${VAR}` references from the environment. Stream keys are usually kept out
/// of the config file this way.
fn expand_env_vars(input: &str) -> Result<String, RelayError> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| RelayError::InvalidConfig(e.to_string()))?;

    let mut missing: Option<String> = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    if let Some(name) = missing {
        return Err(RelayError::MissingEnvVar { name });
    }
    Ok(result.into_owned())
}

/// Loads and parses the configuration file, expanding environment variables.
pub fn load_config(config_path: Option<&str>) -> Result<RelayConfig, RelayError> {
    let config_path = Path::new(config_path.unwrap_or(DEFAULT_CONFIG_FILE));

    let content = fs::read_to_string(config_path).map_err(|e| {
        RelayError::ConfigReadError(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, config_path.display()),
        ))
    })?;

    let expanded_content = expand_env_vars(&content)?;
    let mut config: RelayConfig = serde_yaml::from_str(&expanded_content)?;

    let base_path = match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    config.resolve_paths(&base_path);
    config.validate()?;

    Ok(config)
}
