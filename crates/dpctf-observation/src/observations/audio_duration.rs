use tracing::debug;

use dpctf_core::{ObservationResult, ObservationStatus, Result};

use super::{round_to, Observation, ObservationOutcome};
use crate::context::{DiagnosticBuffer, ObservationContext};

const NAME: &str =
    "[OF] Audio: The playback duration shall match the duration of the CMAF Track.";

/// Detected audio playback duration matches the CMAF track.
pub struct AudioDurationMatchesCmafTrack;

impl Observation for AudioDurationMatchesCmafTrack {
    fn name(&self) -> &'static str {
        NAME
    }

    fn evaluate(&self, ctx: &ObservationContext<'_>) -> Result<ObservationOutcome> {
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

        let detected = last.audio_segment_timing + last.duration - first.audio_segment_timing;
        let mut diag = DiagnosticBuffer::new();
        if detected < 0.0 {
            diag.push(format!(
                "Detected duration is {}ms, the duration can not be negative.",
                round_to(detected, 2)
            ));
            return Ok(diag.into_result(NAME, ObservationStatus::Fail).into());
        }

        let start_missing = first.media_time - expectations.starting_time;
        let end_missing = expectations.ending_time - (last.media_time + last.duration).round();
        let expected = expectations.expected_duration - start_missing - end_missing;
        let tolerance = if ctx.params.contains("audio_duration_tolerance") {
            ctx.params.get_f64("audio_duration_tolerance")?
        } else {
            ctx.params.get_f64("duration_tolerance")?
        };

        let difference = round_to((detected - expected).abs(), 6);
        let (detected_r, expected_r) = (round_to(detected, 2), round_to(expected, 2));
        let status = if difference > tolerance {
            diag.push(format!(
                "Playback duration is {detected_r}ms does not match expected track duration is {expected_r}ms."
            ));
            ObservationStatus::Fail
        } else {
            diag.push(format!(
                "Playback duration is {detected_r}ms, expected track duration is {expected_r}ms."
            ));
            ObservationStatus::Pass
        };
        diag.push(format!(
            "Detected duration is different by {}ms. Allowed tolerance is {tolerance}ms.",
            round_to(difference, 2)
        ));
        debug!(detected, expected, %status, "Audio duration checked");
        Ok(diag.into_result(NAME, status).into())
    }
}
