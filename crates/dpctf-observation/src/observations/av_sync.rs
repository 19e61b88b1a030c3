use tracing::debug;

use dpctf_core::{
    frame_duration_ms, AudioSegment, MezzanineEvent, ObservationResult, ObservationStatus, Result,
};

use super::{fmt_num, round_to, Observation, ObservationOutcome, REPORT_NUM_OF_FAILURE};
use crate::context::{CameraTiming, DiagnosticBuffer, ObservationContext};

const NAME: &str = "[OF] Audio-Video Synchronization.";

/// Audio and video keep the same offset from their media timeline.
pub struct AudioVideoSynchronization;

/// Offset of one rendered frame from its media time, in ms.
#[derive(Debug, Clone, Copy)]
struct VideoOffset {
    media_time: f64,
    offset: f64,
}

/// Offset of one heard audio segment from its media time, in ms.
#[derive(Debug, Clone, Copy)]
struct AudioOffset<'a> {
    segment: &'a AudioSegment,
    mean_time: f64,
    offset: f64,
}

/// Frame offsets, snapped to whole frame durations.
///
/// The first frame may already be on screen before play, so its last
/// detection is used. The last frame may linger after playback stops, so its
/// first detection is used. Every other frame uses its detection midpoint.
fn video_offsets(events: &[MezzanineEvent], camera: &CameraTiming) -> Vec<VideoOffset> {
    let last = events.len().saturating_sub(1);
    events
        .iter()
        .enumerate()
        .map(|(j, event)| {
            let first_seen = camera.frame_to_ms(event.first_capture_frame);
            let last_seen = camera.frame_to_ms(event.last_capture_frame);
            let frame_duration = frame_duration_ms(&event.frame_rate);
            let (detected, media_time) = if j == 0 {
                (last_seen, event.media_time)
            } else if j == last {
                (first_seen, event.media_time - frame_duration)
            } else {
                (
                    first_seen + (last_seen - first_seen) / 2.0,
                    event.media_time - frame_duration / 2.0,
                )
            };
            let offset = detected - media_time;
            VideoOffset {
                media_time,
                offset: ((offset / frame_duration).round() * frame_duration).trunc(),
            }
        })
        .collect()
}

fn audio_offsets<'a>(
    segments: &'a [AudioSegment],
    sample_length: f64,
    test_start_time: f64,
) -> Vec<AudioOffset<'a>> {
    segments
        .iter()
        .map(|segment| AudioOffset {
            segment,
            mean_time: segment.media_time + sample_length / 2.0,
            offset: test_start_time + segment.audio_segment_timing - segment.media_time,
        })
        .collect()
}

/// Difference to the frame shown at the same media time.
///
/// The first frame within one sample length and the one after it are both
/// candidates; the closer offset wins.
fn sync_difference(
    audio: &AudioOffset<'_>,
    video: &[VideoOffset],
    sample_length: f64,
) -> Option<f64> {
    let near = |v: &VideoOffset| (audio.mean_time - v.media_time).abs() < sample_length;
    let j = video.iter().position(near)?;
    let diff = audio.offset - video[j].offset;
    match video.get(j + 1).filter(|v| near(v)) {
        Some(adjacent) => {
            let other = audio.offset - adjacent.offset;
            Some(if other.abs() < diff.abs() { other } else { diff })
        }
        None => Some(diff),
    }
}

/// Allowed `[upper, lower]` bounds on the sync difference.
#[derive(Debug, Clone, Copy)]
struct SyncTolerance {
    upper: f64,
    lower: f64,
    /// Leading and trailing span, in ms, with relaxed bounds.
    margin: f64,
    margin_tolerance: f64,
}

impl SyncTolerance {
    fn accepts(&self, diff: f64, in_margin: bool) -> bool {
        let widen = if in_margin { self.margin_tolerance } else { 0.0 };
        diff <= self.upper + widen && diff >= self.lower - widen
    }
}

impl Observation for AudioVideoSynchronization {
    fn name(&self) -> &'static str {
        NAME
    }

    fn evaluate(&self, ctx: &ObservationContext<'_>) -> Result<ObservationOutcome> {
        if ctx.mezzanine.is_empty() {
            return Ok(ObservationResult::new(
                NAME,
                ObservationStatus::NotRun,
                "No mezzanine QR code is detected.",
            )
            .into());
        }
        let segments = ctx.audio_segments;
        let (Some(expectations), Some(first), Some(last)) =
            (ctx.audio_expectations(), segments.first(), segments.last())
        else {
            return Ok(ObservationResult::new(
                NAME,
                ObservationStatus::NotRun,
                "No audio segment is detected.",
            )
            .into());
        };

        let [upper, lower]: [f64; 2] = ctx.params.get("av_sync_tolerance")?;
        let tolerance = SyncTolerance {
            upper,
            lower,
            margin: ctx.params.f64_or_zero("av_sync_margin")?,
            margin_tolerance: ctx.params.f64_or_zero("av_sync_margin_tolerance")?,
        };
        let pass_rate = if ctx.params.contains("av_sync_pass_rate") {
            ctx.params.get_f64("av_sync_pass_rate")?
        } else {
            100.0
        };
        let sample_length = expectations.sample_length_ms;

        let mut diag = DiagnosticBuffer::new();
        diag.push(format!(
            "Allowed tolerance is [{}, {}]ms.",
            fmt_num(upper),
            fmt_num(lower)
        ));
        if tolerance.margin > 0.0 {
            diag.push(format!(
                "Allowed tolerance within {}ms of either end is widened by {}ms.",
                fmt_num(tolerance.margin),
                fmt_num(tolerance.margin_tolerance)
            ));
        }

        let video = video_offsets(ctx.mezzanine, &ctx.camera);
        let audio = audio_offsets(segments, sample_length, ctx.test_start_time());
        let window_start = first.media_time;
        let window_end = last.media_time + last.duration;

        let (mut passes, mut failures) = (0usize, 0usize);
        for offset in &audio {
            // Segments without a frame at the same media time are not measurable.
            let Some(diff) = sync_difference(offset, &video, sample_length) else {
                continue;
            };
            let in_margin = offset.mean_time - window_start < tolerance.margin
                || window_end - offset.mean_time < tolerance.margin;
            if tolerance.accepts(diff, in_margin) {
                passes += 1;
                continue;
            }
            if failures == 0 {
                diag.push("The Audio-Video Synchronization failed at following events:");
            }
            if failures < REPORT_NUM_OF_FAILURE {
                diag.push(format!(
                    "audio media time={}:{}ms AV Sync time diff={}ms;",
                    offset.segment.content_id,
                    fmt_num(offset.segment.media_time),
                    round_to(diff, 4)
                ));
            }
            failures += 1;
        }

        let checked = passes + failures;
        if checked == 0 {
            diag.push("No audio segment could be matched to a video frame.");
            return Ok(diag.into_result(NAME, ObservationStatus::NotRun).into());
        }
        if failures >= REPORT_NUM_OF_FAILURE {
            diag.push("...too many failures, reporting truncated.");
        }
        let failed_percent = failures as f64 / checked as f64 * 100.0;
        diag.push(format!(
            "Total failure count is {failures}, {}% failed.",
            round_to(failed_percent, 2)
        ));
        if pass_rate < 100.0 {
            diag.push(format!("Required pass rate is {}%.", fmt_num(pass_rate)));
        }

        let status = if 100.0 - failed_percent >= pass_rate {
            ObservationStatus::Pass
        } else {
            ObservationStatus::Fail
        };
        debug!(checked, failures, %status, "Audio-video synchronization checked");
        Ok(diag.into_result(NAME, status).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AudioExpectations;
    use crate::observations::fixtures::Fixture;
    use crate::test_support::{audio_run, sequential_events};

    /// Two seconds of 30 fps video on a 120 fps camera; every frame
    /// offset snaps to 33 ms. Audio heard `audio_lag` ms after its media time.
    fn fixture(audio_lag: f64) -> Fixture {
        let mut fixture = Fixture::new(sequential_events(1..=60, 30, 0, 4))
            .param("av_sync_tolerance", [15, -45]);
        fixture.audio_segments = audio_run(90, 20.0, audio_lag);
        fixture.expectations.audio = Some(AudioExpectations {
            content_id: "PN01".to_string(),
            sample_length_ms: 20.0,
            sample_rate: 48_000,
            expected_duration: 1800.0,
            starting_time: 0.0,
            ending_time: 1800.0,
        });
        fixture
    }

    fn evaluate(fixture: &Fixture) -> ObservationResult {
        AudioVideoSynchronization
            .evaluate(&fixture.ctx())
            .unwrap()
            .result
    }

    /// First five segments 30 ms later than the rest.
    fn late_start() -> Fixture {
        let mut fixture = fixture(33.0);
        for segment in &mut fixture.audio_segments[..5] {
            segment.audio_segment_timing += 30.0;
        }
        fixture
    }

    #[test]
    fn test_video_offsets_snap_to_frames() {
        let events = sequential_events(1..=5, 30, 0, 4);
        let offsets = video_offsets(&events, &CameraTiming::new(120.0));
        assert!(offsets.iter().all(|v| v.offset == 33.0));
        assert_eq!(offsets[0].media_time, 0.0);
        assert!((offsets[4].media_time - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_in_sync_passes() {
        let result = evaluate(&fixture(33.0));
        assert!(result.is_pass(), "{}", result.message);
        assert_eq!(
            result.message,
            "Allowed tolerance is [15, -45]ms. Total failure count is 0, 0% failed."
        );
    }

    #[test]
    fn test_late_audio_fails() {
        let result = evaluate(&fixture(100.0));
        assert_eq!(result.status, ObservationStatus::Fail);
        assert!(result
            .message
            .contains("audio media time=PN01:0ms AV Sync time diff=67ms;"));
        assert!(result.message.contains("...too many failures, reporting truncated."));
        assert!(result.message.ends_with("Total failure count is 90, 100% failed."));
    }

    #[test]
    fn test_margin_widens_tolerance() {
        let result = evaluate(&late_start());
        assert_eq!(result.status, ObservationStatus::Fail);
        assert!(result.message.ends_with("Total failure count is 5, 5.56% failed."));

        let fixture = late_start()
            .param("av_sync_margin", 100)
            .param("av_sync_margin_tolerance", 20);
        let result = evaluate(&fixture);
        assert!(result.is_pass(), "{}", result.message);
    }

    #[test]
    fn test_pass_rate_allows_some_failures() {
        let fixture = late_start().param("av_sync_pass_rate", 90);
        let result = evaluate(&fixture);
        assert!(result.is_pass(), "{}", result.message);
        assert!(result.message.ends_with("Required pass rate is 90%."));
    }

    #[test]
    fn test_missing_inputs_not_run() {
        let mut fixture = fixture(33.0);
        fixture.audio_segments.clear();
        assert_eq!(evaluate(&fixture).status, ObservationStatus::NotRun);

        let fixture = Fixture::new(Vec::new());
        let result = evaluate(&fixture);
        assert_eq!(result.message, "No mezzanine QR code is detected.");
    }
}
