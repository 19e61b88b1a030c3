//! Capture frame sources.
//!
//! QR recognition runs outside the framework; its output reaches the
//! processor as one [`CaptureFrame`] per recorded camera frame.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use dpctf_core::{DpctfError, Location, Result};

/// One QR code recognized on a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub data: String,
    /// `[left, top, width, height]` in pixels.
    #[serde(default)]
    pub location: [f64; 4],
}

impl Detection {
    pub fn new(data: impl Into<String>, location: [f64; 4]) -> Self {
        Self {
            data: data.into(),
            location,
        }
    }

    pub fn location(&self) -> Location {
        let [left, top, width, height] = self.location;
        Location::new(left, top, width, height)
    }
}

/// Every code recognized on one camera frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureFrame {
    /// Camera frame index from the start of the recording.
    pub frame: u64,
    #[serde(default)]
    pub codes: Vec<Detection>,
}

impl CaptureFrame {
    pub fn new(frame: u64, codes: Vec<Detection>) -> Self {
        Self { frame, codes }
    }
}

/// Ordered supply of capture frames.
pub trait FrameSource {
    /// Next frame, or `None` at the end of the recording.
    fn next_frame(&mut self) -> Result<Option<CaptureFrame>>;
}

/// Detections stored one JSON object per line.
pub struct JsonLinesSource<R: BufRead> {
    lines: Lines<R>,
    line_no: usize,
}

impl JsonLinesSource<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            DpctfError::Config(format!("Failed to open '{}': {e}", path.display()))
        })?;
        info!(path = %path.display(), "Reading capture detections");
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

impl<R: BufRead> FrameSource for JsonLinesSource<R> {
    fn next_frame(&mut self) -> Result<Option<CaptureFrame>> {
        for line in self.lines.by_ref() {
            let line = line?;
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let frame: CaptureFrame = serde_json::from_str(&line).map_err(|e| {
                DpctfError::Serialization(format!("line {}: {e}", self.line_no))
            })?;
            debug!(frame = frame.frame, codes = frame.codes.len(), "Frame read");
            return Ok(Some(frame));
        }
        Ok(None)
    }
}

/// In-memory frames, for tests and pre-decoded captures.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    frames: VecDeque<CaptureFrame>,
}

impl VecSource {
    pub fn new(frames: impl IntoIterator<Item = CaptureFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for VecSource {
    fn next_frame(&mut self) -> Result<Option<CaptureFrame>> {
        Ok(self.frames.pop_front())
    }
}
