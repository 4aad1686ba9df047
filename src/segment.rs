//! On-disk layout of segmented (HLS) output.
use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::{info, warn};

use crate::{
    constants::{PLAYLIST_FILE_NAME, SEGMENT_FILE_PATTERN},
    stream::StreamIdentity,
};

/// Output directory of one stream's segmentation relay: `<output_dir>/<stream key>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentLayout {
    dir: PathBuf,
}

impl SegmentLayout {
    pub fn new(output_dir: &Path, identity: &StreamIdentity) -> Self {
        Self {
            dir: output_dir.join(identity.key()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Manifest path handed to the encoder.
    pub fn playlist(&self) -> PathBuf {
        self.dir.join(PLAYLIST_FILE_NAME)
    }

    /// Segment file template handed to the encoder.
    pub fn segment_pattern(&self) -> PathBuf {
        self.dir.join(SEGMENT_FILE_PATTERN)
    }

    /// Creates the output directory. Existing contents are left alone.
    pub fn prepare(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)
    }
}

/// Deletes a segment directory and everything in it.
///
/// Returns `Ok(false)` when the directory was already gone.
pub fn purge(dir: &Path) -> io::Result<bool> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// [`purge`], logging the outcome instead of returning it.
pub fn reclaim(identity: &StreamIdentity, dir: &Path) {
    match purge(dir) {
        Ok(true) => info!(
            "Removed segmented output for stream '{identity}' at {}",
            dir.display()
        ),
        Ok(false) => {}
        Err(err) => warn!(
            "Failed to remove segmented output for stream '{identity}' at {}: {err}",
            dir.display()
        ),
    }
}
