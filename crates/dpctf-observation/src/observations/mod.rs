//! Pass/fail checks run over the events collected for one test.

pub mod audio_duration;
pub mod audio_every_sample;
pub mod audio_sample_matches;
pub mod audio_start_up_delay;
pub mod audio_unexpected_sample;
pub mod av_sync;
pub mod duration;
pub mod earliest_sample;
pub mod every_sample_rendered;
pub mod rendering_delay;
pub mod sample_matches;
pub mod start_up_delay;
pub mod unexpected_sample;
pub mod video_shifts;

use dpctf_core::{AudioSegment, MezzanineEvent, ObservationResult, Result, StatusEvent};

use crate::context::{CameraTiming, ObservationContext};

/// Failures listed in a message before it is truncated.
pub(crate) const REPORT_NUM_OF_FAILURE: usize = 50;
/// Half a camera frame either side of a detection window.
pub(crate) const CAMERA_FRAME_ADJUSTMENT: f64 = 0.5;

/// Result of one evaluation.
#[derive(Debug, Clone)]
pub struct ObservationOutcome {
    pub result: ObservationResult,
    /// Filtered audio segments that replace the list seen by later observations.
    pub audio_segments: Option<Vec<AudioSegment>>,
}

impl From<ObservationResult> for ObservationOutcome {
    fn from(result: ObservationResult) -> Self {
        Self {
            result,
            audio_segments: None,
        }
    }
}

/// One pass/fail check.
pub trait Observation: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, ctx: &ObservationContext<'_>) -> Result<ObservationOutcome>;
}

/// Every observation a test can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservationKind {
    EverySampleRendered,
    EverySampleRenderedInCmaf,
    Duration,
    StartUpDelay,
    SampleMatches,
    EarliestSample,
    RenderingDelay,
    UnexpectedSample,
    NoVisibleVideoShifts,
    AudioEverySampleRendered,
    AudioDuration,
    AudioStartUpDelay,
    AudioSampleMatches,
    AudioUnexpectedSample,
    AvSync,
}

impl ObservationKind {
    pub fn build(&self) -> Box<dyn Observation> {
        match self {
            ObservationKind::EverySampleRendered => {
                Box::new(every_sample_rendered::EverySampleRendered::new())
            }
            ObservationKind::EverySampleRenderedInCmaf => {
                Box::new(every_sample_rendered::EverySampleRendered::in_cmaf_presentation())
            }
            ObservationKind::Duration => Box::new(duration::DurationMatchesCmafTrack),
            ObservationKind::StartUpDelay => Box::new(start_up_delay::StartUpDelay),
            ObservationKind::SampleMatches => Box::new(sample_matches::SampleMatchesCurrentTime),
            ObservationKind::EarliestSample => {
                Box::new(earliest_sample::EarliestSampleSamePresentationTime)
            }
            ObservationKind::RenderingDelay => {
                Box::new(rendering_delay::RenderingDelayWithinThreshold)
            }
            ObservationKind::UnexpectedSample => {
                Box::new(unexpected_sample::UnexpectedSampleNotRendered)
            }
            ObservationKind::NoVisibleVideoShifts => Box::new(video_shifts::NoVisibleVideoShifts),
            ObservationKind::AudioEverySampleRendered => {
                Box::new(audio_every_sample::AudioEverySampleRendered)
            }
            ObservationKind::AudioDuration => {
                Box::new(audio_duration::AudioDurationMatchesCmafTrack)
            }
            ObservationKind::AudioStartUpDelay => Box::new(audio_start_up_delay::AudioStartUpDelay),
            ObservationKind::AudioSampleMatches => {
                Box::new(audio_sample_matches::AudioSampleMatchesCurrentTime)
            }
            ObservationKind::AudioUnexpectedSample => {
                Box::new(audio_unexpected_sample::AudioUnexpectedSampleNotRendered)
            }
            ObservationKind::AvSync => Box::new(av_sync::AudioVideoSynchronization),
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            ObservationKind::AudioEverySampleRendered
                | ObservationKind::AudioDuration
                | ObservationKind::AudioStartUpDelay
                | ObservationKind::AudioSampleMatches
                | ObservationKind::AudioUnexpectedSample
                | ObservationKind::AvSync
        )
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Time of the first status whose last action is `action`.
///
/// Needs the status after it for the generation delay; `None` when the
/// action never happened or was the last code shown.
pub fn find_event(action: &str, statuses: &[StatusEvent], camera: &CameraTiming) -> Option<f64> {
    let i = statuses.iter().position(|s| s.last_action == action)?;
    let next = statuses.get(i + 1)?;
    Some(camera.status_time_ms(&statuses[i], next))
}

/// Indices where the content id or the frame rate changes, starting with 0.
pub fn playback_change_positions(events: &[MezzanineEvent]) -> Vec<usize> {
    change_positions(events, |a, b| {
        a.content_id != b.content_id || a.frame_rate != b.frame_rate
    })
}

/// Indices where the content id changes, starting with 0.
pub fn content_change_positions(events: &[MezzanineEvent]) -> Vec<usize> {
    change_positions(events, |a, b| a.content_id != b.content_id)
}

fn change_positions(
    events: &[MezzanineEvent],
    changed: impl Fn(&MezzanineEvent, &MezzanineEvent) -> bool,
) -> Vec<usize> {
    if events.is_empty() {
        return Vec::new();
    }
    let mut positions = vec![0];
    let mut current = &events[0];
    for (i, event) in events.iter().enumerate().skip(1) {
        if changed(current, event) {
            positions.push(i);
            current = event;
        }
    }
    positions
}

pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// Render a float without a trailing `.0` for whole values.
pub(crate) fn fmt_num(value: f64) -> String {
    let rounded = round_to(value, 3);
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{rounded}")
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sequential_events, status};
    use dpctf_core::FrameRate;

    #[test]
    fn test_find_event_uses_next_delay() {
        let camera = CameraTiming::new(100.0);
        let statuses = vec![
            status("ready", "load", 0.0, 0, 10),
            status("playing", "play", 0.0, 0, 20),
            status("playing", "play", 0.1, 30, 40),
        ];
        assert_eq!(find_event("play", &statuses, &camera), Some(170.0));
        assert_eq!(find_event("pause", &statuses, &camera), None);
    }

    #[test]
    fn test_find_event_needs_following_status() {
        let camera = CameraTiming::new(100.0);
        let statuses = vec![
            status("playing", "play", 0.0, 0, 20),
            status("playing", "representation_change", 0.0, 0, 30),
        ];
        assert_eq!(find_event("representation_change", &statuses, &camera), None);
    }

    #[test]
    fn test_change_positions() {
        let mut events = sequential_events(1..=6, 30, 0, 4);
        for event in &mut events[2..4] {
            event.frame_rate = FrameRate::from_integer(25);
        }
        for event in &mut events[4..] {
            event.content_id = "B1".to_string();
        }
        assert_eq!(playback_change_positions(&events), vec![0, 2, 4]);
        assert_eq!(content_change_positions(&events), vec![0, 4]);
        assert!(playback_change_positions(&[]).is_empty());
    }

    #[test]
    fn test_fmt_num() {
        assert_eq!(fmt_num(10.0), "10");
        assert_eq!(fmt_num(33.36666), "33.367");
        assert_eq!(fmt_num(-2.5), "-2.5");
    }

    #[test]
    fn test_every_kind_builds() {
        let kinds = [
            ObservationKind::EverySampleRendered,
            ObservationKind::EverySampleRenderedInCmaf,
            ObservationKind::Duration,
            ObservationKind::AvSync,
        ];
        let names: Vec<_> = kinds.iter().map(|k| k.build().name()).collect();
        assert!(names.iter().all(|n| n.starts_with("[OF] ")));
        assert_ne!(names[0], names[1]);
    }
}
