//! Marker detection seam.

use std::fs;
use std::path::{Path, PathBuf};

use image::GrayImage;
use tagpose_core::Detection;

/// Finds square fiducials in a binarized frame.
///
/// Detections come back in the detector's own order; only the first one is
/// used for reporting.
pub trait MarkerDetector: Send {
    fn detect(&mut self, frame: &GrayImage) -> Vec<Detection>;
}

#[derive(thiserror::Error, Debug)]
pub enum DetectorError {
    #[error("cannot read detection recording {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("detection recording {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Replays recorded detections, one list per frame, wrapping around at the
/// end of the recording.
///
/// The recording is a JSON array of per-frame arrays:
/// `[[{"id": 0, "corners": [[x, y], ...]}], [], ...]`.
#[derive(Clone, Debug, Default)]
pub struct PlaybackDetector {
    frames: Vec<Vec<Detection>>,
    cursor: usize,
}

impl PlaybackDetector {
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self { frames, cursor: 0 }
    }

    /// A detector that never sees anything.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, DetectorError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| DetectorError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let frames: Vec<Vec<Detection>> =
            serde_json::from_str(&raw).map_err(|source| DetectorError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        log::info!(
            "loaded {} recorded frames from {}",
            frames.len(),
            path.display()
        );
        Ok(Self::new(frames))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl MarkerDetector for PlaybackDetector {
    fn detect(&mut self, _frame: &GrayImage) -> Vec<Detection> {
        if self.frames.is_empty() {
            return Vec::new();
        }
        let out = self.frames[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.frames.len();
        out
    }
}
