//! Stream identities, relay targets and publish-session resolution.
use std::{
    fmt,
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};

use crate::constants::SEGMENTER_TARGET_NAME;

/// Normalized key for one inbound live stream.
///
/// The publish path is stripped of leading and trailing slashes; the remaining
/// separators are replaced with `__` to form a single-token key that is safe to use in
/// file names. Equality and hashing only consider the key.
#[derive(Debug, Clone)]
pub struct StreamIdentity {
    key: String,
    path: String,
}

impl StreamIdentity {
    /// Normalizes a publish path. Returns `None` when nothing is left after stripping
    /// slashes, or when any segment is `.` or `..`.
    pub fn from_path(raw: &str) -> Option<Self> {
        let path = raw.trim().trim_matches('/');
        if path.is_empty() || path.split('/').any(|segment| matches!(segment, "." | "..")) {
            return None;
        }

        Some(Self {
            key: path.replace('/', "__"),
            path: path.to_string(),
        })
    }

    /// Single-token key, e.g. `live__abc123`.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Normalized publish path, e.g. `live/abc123`.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl PartialEq for StreamIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for StreamIdentity {}

impl Hash for StreamIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Something a stream is relayed to.
///
/// Ordering puts the segmenter first so that teardown and listings handle it before
/// any destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelayTarget {
    /// Local HLS segmentation into the stream's output directory.
    Segmenter,
    /// A configured outbound destination, by name.
    Destination(String),
}

impl RelayTarget {
    /// Name used in log file names and log messages.
    pub fn name(&self) -> &str {
        match self {
            RelayTarget::Segmenter => SEGMENTER_TARGET_NAME,
            RelayTarget::Destination(name) => name,
        }
    }

    pub fn is_segmenter(&self) -> bool {
        matches!(self, RelayTarget::Segmenter)
    }
}

impl fmt::Display for RelayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Session context an ingest server attaches to a publish event.
///
/// Servers expose the path through different fields depending on protocol and version,
/// so every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_stream_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_app: Option<String>,
}

/// How a publish path was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLocator {
    /// A full publish path, e.g. `/live/abc123`.
    Path(String),
    /// A bare stream name, optionally qualified by its application namespace.
    Named { app: Option<String>, name: String },
}

impl StreamLocator {
    /// Publish path for this locator, filling in `default_app` for bare names.
    pub fn into_path(self, default_app: &str) -> String {
        match self {
            StreamLocator::Path(path) => path,
            StreamLocator::Named { app, name } => {
                format!("/{}/{}", app.as_deref().unwrap_or(default_app), name)
            }
        }
    }
}

/// Capabilities a notification source may offer for locating its stream.
///
/// Implementors expose whichever fields they carry; [`LocatorSource::locator`] picks an
/// explicit path over a raw name and never invents one.
pub trait LocatorSource {
    /// A full publish path, if the source carries one.
    fn explicit_path(&self) -> Option<&str> {
        None
    }

    /// Raw stream name and optional application namespace.
    fn raw_name(&self) -> Option<(&str, Option<&str>)> {
        None
    }

    fn locator(&self) -> Option<StreamLocator> {
        if let Some(path) = self.explicit_path().filter(|p| !p.trim().is_empty()) {
            return Some(StreamLocator::Path(path.to_string()));
        }

        self.raw_name()
            .filter(|(name, _)| !name.trim().is_empty())
            .map(|(name, app)| StreamLocator::Named {
                app: app.filter(|a| !a.trim().is_empty()).map(str::to_string),
                name: name.to_string(),
            })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

impl LocatorSource for PublishSession {
    fn explicit_path(&self) -> Option<&str> {
        non_empty(&self.publish_stream_path).or_else(|| non_empty(&self.stream_path))
    }

    fn raw_name(&self) -> Option<(&str, Option<&str>)> {
        non_empty(&self.stream_name).map(|name| (name, non_empty(&self.stream_app)))
    }
}
