//! DPCTF Observation crate - test handlers, expectations and observation checks.
//!
//! Resolves a detected test id into a [`TestHandler`] through the closed
//! [`TestKind`] registry, loads its parameters from `tests.json` and
//! `test-config.json`, derives the expected first/last frames and durations,
//! and runs the handler's observations over the collected QR events and
//! decoded audio segments.

pub mod config_parser;
pub mod context;
pub mod handler;
pub mod observations;
pub mod playout;
pub mod test_kind;

pub use config_parser::{
    parse_iso8601_duration, ConfigurationParser, ContentTypes, TestDescriptor,
};
pub use context::{
    AudioEvidence, AudioExpectations, CameraTiming, DiagnosticBuffer, ExpectedDuration,
    ObservationContext, TestExpectations,
};
pub use handler::{
    build_handler, AudioSegmentData, ObservationInput, SequentialPlaybackBehavior, TestHandler,
};
pub use observations::{Observation, ObservationKind, ObservationOutcome};
pub use playout::{ChangeType, FragmentDurations, PlayoutEntry};
pub use test_kind::{ParameterSpec, TestKind, TestType};

#[cfg(test)]
pub(crate) mod test_support {
    use dpctf_core::{AudioSegment, FrameRate, Location, MezzanineEvent, StatusEvent};

    /// One mezzanine event per frame, each shown for `capture_per_frame`
    /// camera frames starting at `first_capture`.
    pub fn sequential_events(
        frames: impl IntoIterator<Item = u32>,
        fps: i64,
        first_capture: u64,
        capture_per_frame: u64,
    ) -> Vec<MezzanineEvent> {
        let rate = FrameRate::from_integer(fps);
        frames
            .into_iter()
            .enumerate()
            .map(|(i, frame)| {
                let capture = first_capture + i as u64 * capture_per_frame;
                let media_time = f64::from(frame - 1) * 1000.0 / fps as f64;
                let mut event = MezzanineEvent::new(
                    format!("A1;{frame}"),
                    "A1",
                    media_time,
                    frame,
                    rate,
                    capture,
                    Location::new(10.0, 10.0, 100.0, 100.0),
                );
                event.last_capture_frame = capture + capture_per_frame - 1;
                event
            })
            .collect()
    }

    pub fn status(
        status: &str,
        action: &str,
        current_time: f64,
        delay: i64,
        capture: u64,
    ) -> StatusEvent {
        StatusEvent {
            payload: format!("{status};{action};{current_time}"),
            status: status.to_string(),
            last_action: action.to_string(),
            current_time,
            delay,
            capture_frame_num: capture,
        }
    }

    /// `count` consecutive audio segments of `length_ms`, each found
    /// `timing_offset_ms` after its media time.
    pub fn audio_run(count: usize, length_ms: f64, timing_offset_ms: f64) -> Vec<AudioSegment> {
        (0..count)
            .map(|i| {
                let media_time = i as f64 * length_ms;
                AudioSegment {
                    content_id: "PN01".to_string(),
                    media_time,
                    audio_segment_timing: media_time + timing_offset_ms,
                    duration: length_ms,
                }
            })
            .collect()
    }
}
