use dpctf_audio::MezzanineSegment;
use dpctf_core::{
    AudioSegment, MezzanineEvent, ObservationConfig, ObservationResult, ObservationStatus,
    ParametersDict, StatusEvent,
};

use crate::playout::{FragmentDurations, PlayoutEntry};
use crate::test_kind::TestType;

/// Recording camera clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraTiming {
    pub frame_rate: f64,
    pub frame_duration_ms: f64,
}

impl CameraTiming {
    pub fn new(frame_rate: f64) -> Self {
        Self {
            frame_rate,
            frame_duration_ms: 1000.0 / frame_rate,
        }
    }

    /// Capture frame index to milliseconds since the recording started.
    pub fn frame_to_ms(&self, capture_frame: u64) -> f64 {
        capture_frame as f64 * self.frame_duration_ms
    }

    /// Moment a status code was generated: its capture time minus the
    /// generation delay reported by the code shown after it.
    pub fn status_time_ms(&self, status: &StatusEvent, next: &StatusEvent) -> f64 {
        self.frame_to_ms(status.capture_frame_num) - next.delay as f64
    }
}

/// Expected playback duration of a test, in ms.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpectedDuration {
    Single(f64),
    /// Truncated playback: the first presentation up to the switch, then the
    /// second presentation in full.
    Truncated { first: f64, second: f64 },
}

impl Default for ExpectedDuration {
    fn default() -> Self {
        ExpectedDuration::Single(0.0)
    }
}

impl ExpectedDuration {
    pub fn total(&self) -> f64 {
        match self {
            ExpectedDuration::Single(d) => *d,
            ExpectedDuration::Truncated { first, second } => first + second,
        }
    }
}

/// Audio expectations derived from the test parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioExpectations {
    pub content_id: String,
    pub sample_length_ms: f64,
    pub sample_rate: u32,
    pub expected_duration: f64,
    /// Media time the audio is expected to start from, in ms.
    pub starting_time: f64,
    /// Media time the audio is expected to end at, in ms.
    pub ending_time: f64,
}

impl AudioExpectations {
    pub fn samples_per_ms(&self) -> usize {
        dpctf_audio::samples_per_ms(self.sample_rate)
    }

    /// Samples per observation period.
    pub fn observation_period(&self) -> usize {
        self.samples_per_ms() * self.sample_length_ms as usize
    }
}

/// Everything a handler expects from one test run.
#[derive(Debug, Clone, Default)]
pub struct TestExpectations {
    pub first_frame_num: i64,
    pub last_frame_num: i64,
    pub expected_duration: ExpectedDuration,
    /// `(gap_from, gap_to)` frame numbers of a configured playback gap.
    pub gap_frames: Option<(i64, i64)>,
    pub playout: Vec<PlayoutEntry>,
    pub second_playout: Vec<PlayoutEntry>,
    /// Seconds into the first presentation where a truncated test restarts.
    pub second_playout_switching_time: f64,
    pub fragment_durations: FragmentDurations,
    pub audio: Option<AudioExpectations>,
}

/// Raw audio a test's audio observations work on.
#[derive(Debug, Clone, Copy)]
pub struct AudioEvidence<'a> {
    /// Recording from the moment the test started.
    pub subject: &'a [i16],
    pub expected: &'a MezzanineSegment,
    /// Watermark preceding the random access point, if any.
    pub unexpected: Option<&'a MezzanineSegment>,
    /// Trim offset of the expected watermark, in ms.
    pub first_offset_ms: f64,
    /// Position of the test start inside the recording, in ms.
    pub test_start_time: f64,
}

/// Read-only inputs handed to every observation of a test.
#[derive(Debug, Clone, Copy)]
pub struct ObservationContext<'a> {
    pub test_type: TestType,
    pub mezzanine: &'a [MezzanineEvent],
    pub statuses: &'a [StatusEvent],
    pub audio_segments: &'a [AudioSegment],
    pub params: &'a ParametersDict,
    pub expectations: &'a TestExpectations,
    pub config: &'a ObservationConfig,
    pub camera: CameraTiming,
    pub audio: Option<AudioEvidence<'a>>,
}

impl<'a> ObservationContext<'a> {
    pub fn audio_expectations(&self) -> Option<&'a AudioExpectations> {
        self.expectations.audio.as_ref()
    }

    pub fn test_start_time(&self) -> f64 {
        self.audio.map(|a| a.test_start_time).unwrap_or(0.0)
    }
}

/// Accumulates the human readable part of a result message.
///
/// Pieces are trimmed and joined with a single space.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticBuffer {
    text: String,
}

impl DiagnosticBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, piece: impl AsRef<str>) {
        let piece = piece.as_ref().trim();
        if piece.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(piece);
    }

    /// Append directly after the previous piece, for list continuations.
    pub fn append(&mut self, piece: impl AsRef<str>) {
        self.text.push_str(piece.as_ref());
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.text.contains(needle)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_result(
        self,
        name: impl Into<String>,
        status: ObservationStatus,
    ) -> ObservationResult {
        ObservationResult::new(name, status, self.text.trim_end())
    }
}
