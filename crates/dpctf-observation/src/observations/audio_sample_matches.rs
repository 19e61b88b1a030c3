use tracing::debug;

use dpctf_core::{AudioSegment, ObservationResult, ObservationStatus, Result, StatusEvent};

use super::{
    round_to, Observation, ObservationOutcome, CAMERA_FRAME_ADJUSTMENT, REPORT_NUM_OF_FAILURE,
};
use crate::context::{CameraTiming, DiagnosticBuffer, ObservationContext};

const NAME: &str = "[OF] Audio: The presented sample shall match the one reported by the currentTime value within the tolerance of the sample duration.";

/// Audio heard matches the currentTime reported with each status.
pub struct AudioSampleMatchesCurrentTime;

struct AudioTolerance {
    /// Milliseconds.
    tolerance: f64,
    /// Audio samples.
    sample_tolerance: f64,
    sample_length: f64,
}

impl AudioTolerance {
    fn allowed(&self) -> f64 {
        self.tolerance + self.sample_tolerance * self.sample_length
    }
}

/// Smallest difference between `ct` and the segments heard around the status.
fn audio_diff_within_tolerance(
    segments: &[AudioSegment],
    status: &StatusEvent,
    next: &StatusEvent,
    camera: &CameraTiming,
    test_start_time: f64,
    tolerance: &AudioTolerance,
) -> (bool, f64) {
    let current_time_ms = status.current_time * 1000.0;
    let detected = camera.status_time_ms(status, next) - test_start_time;
    let spread = CAMERA_FRAME_ADJUSTMENT * camera.frame_duration_ms
        + tolerance.sample_tolerance * tolerance.sample_length;
    let (first_possible, last_possible) = (detected - spread, detected + spread);

    let mut time_diff = f64::MAX;
    for segment in segments {
        let half = CAMERA_FRAME_ADJUSTMENT * tolerance.sample_length;
        let appear_from = segment.audio_segment_timing - half;
        let appear_till = segment.audio_segment_timing + half;
        if first_possible > appear_till || last_possible < appear_from {
            continue;
        }
        time_diff = time_diff.min((segment.media_time - current_time_ms).abs());
        if time_diff <= tolerance.allowed() {
            return (true, time_diff);
        }
    }
    (false, time_diff)
}

impl Observation for AudioSampleMatchesCurrentTime {
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

        let tolerance = AudioTolerance {
            tolerance: ctx.params.get_f64("audio_tolerance")?,
            sample_tolerance: ctx.params.get_f64("audio_sample_tolerance")?,
            sample_length: expectations.sample_length_ms,
        };
        let test_start_time = ctx.test_start_time();

        let mut diag = DiagnosticBuffer::new();
        let mut failures = 0usize;
        let mut first_current_time = None;
        for pair in ctx.statuses.windows(2) {
            let (status, next) = (&pair[0], &pair[1]);
            let reports_time = status.is_playing()
                && (status.last_action == "play"
                    || status.last_action == "representation_change");
            if !reports_time {
                continue;
            }
            // The starting report is taken before any audio is heard.
            let first = *first_current_time.get_or_insert(status.current_time);
            if status.current_time == first {
                continue;
            }

            let (found, time_diff) = audio_diff_within_tolerance(
                segments,
                status,
                next,
                &ctx.camera,
                test_start_time,
                &tolerance,
            );
            if found {
                continue;
            }
            if failures == 0 {
                diag.push(
                    "Time difference between Test Runner reported media currentTime and actual media time exceeded tolerance for following events:",
                );
            }
            if failures < REPORT_NUM_OF_FAILURE {
                diag.push(format!(
                    "currentTime={} time_diff={};",
                    status.current_time,
                    round_to(time_diff, 4)
                ));
            }
            failures += 1;
        }

        if failures >= REPORT_NUM_OF_FAILURE {
            diag.push("...too many failures, reporting truncated.");
        }
        diag.push(format!("Total failure count is {failures}."));
        let status = if failures == 0 {
            ObservationStatus::Pass
        } else {
            ObservationStatus::Fail
        };
        debug!(failures, %status, "Audio sample matches current time checked");
        Ok(diag.into_result(NAME, status).into())
    }
}
