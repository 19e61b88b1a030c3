use tracing::debug;

use dpctf_core::{AudioSegment, ObservationResult, ObservationStatus, Result};

use super::{round_to, Observation, ObservationOutcome};
use crate::context::{DiagnosticBuffer, ObservationContext};

const NAME: &str = "[OF] When examined as a continuous sequence of timestamped audio samples of the audio stream, the 20ms test audio samples shall be a complete rendering of the source audio track and are rendered in increasing presentation time order.";

/// Misplaced segments listed before the report is cut short.
const REPORT_MISSING: usize = 20;

/// Every audio segment is found where it belongs, in order.
///
/// Segments that fail are dropped from the list handed to the audio
/// observations that follow.
pub struct AudioEverySampleRendered;

/// Detected positions of the segments on the media timeline.
struct SegmentTimeline<'a> {
    segments: &'a [AudioSegment],
    shift: f64,
    sample_length: f64,
}

impl SegmentTimeline<'_> {
    fn detected(&self, i: usize) -> f64 {
        self.segments[i].audio_segment_timing + self.shift
    }

    fn matches_expected(&self, i: usize) -> bool {
        (self.detected(i) - self.segments[i].media_time).abs() <= self.sample_length
    }

    /// Segment `later` follows `earlier` within two sample lengths.
    fn in_line(&self, earlier: usize, later: usize) -> bool {
        let diff = self.detected(later) - self.detected(earlier);
        diff > 0.0 && diff <= self.sample_length * 2.0
    }

    /// Accept a segment that is on time, or that lines up with its
    /// neighbours so that three points determine a line.
    fn rendered(&self, i: usize) -> bool {
        if self.matches_expected(i) {
            return true;
        }
        let last = self.segments.len() - 1;
        let with_previous = i > 0 && self.in_line(i - 1, i);
        let with_next = i < last && self.in_line(i, i + 1);
        match (with_previous, with_next) {
            (false, false) => false,
            (true, true) => true,
            (true, false) => i < 2 || self.in_line(i - 2, i - 1),
            (false, true) => i + 2 > last || self.in_line(i + 1, i + 2),
        }
    }
}

impl Observation for AudioEverySampleRendered {
    fn name(&self) -> &'static str {
        NAME
    }

    fn evaluate(&self, ctx: &ObservationContext<'_>) -> Result<ObservationOutcome> {
        let segments = ctx.audio_segments;
        let expectations = match ctx.audio_expectations() {
            Some(audio) if !segments.is_empty() => audio,
            _ => {
                return Ok(ObservationResult::new(
                    NAME,
                    ObservationStatus::NotRun,
                    "No audio segment is detected.",
                )
                .into());
            }
        };

        let first_offset_ms = ctx.audio.map(|a| a.first_offset_ms).unwrap_or(0.0);
        let timeline = SegmentTimeline {
            segments,
            shift: expectations.starting_time - first_offset_ms,
            sample_length: expectations.sample_length_ms,
        };

        let mut diag = DiagnosticBuffer::new();
        let mut kept = Vec::with_capacity(segments.len());
        let mut errors = 0usize;
        for (i, segment) in segments.iter().enumerate() {
            if timeline.rendered(i) {
                kept.push(segment.clone());
                continue;
            }
            if errors < REPORT_MISSING {
                diag.push(format!(
                    "Segment({}ms) is not detected on expected time, sample is found at {}ms.",
                    round_to(segment.media_time, 2),
                    round_to(timeline.detected(i), 2)
                ));
            }
            errors += 1;
        }

        let status = if errors == 0 {
            diag.push("All segments are rendered and are in order.");
            ObservationStatus::Pass
        } else {
            if errors >= REPORT_MISSING {
                diag.push("...too many failures, reporting truncated.");
            }
            diag.push(format!("Found {errors} segments out of order."));
            ObservationStatus::Fail
        };
        debug!(segments = segments.len(), errors, %status, "Audio every sample checked");
        Ok(ObservationOutcome {
            result: diag.into_result(NAME, status),
            audio_segments: Some(kept),
        })
    }
}
