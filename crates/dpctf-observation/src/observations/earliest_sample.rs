use tracing::debug;

use dpctf_core::{ObservationResult, ObservationStatus, Result};

use super::sample_matches::{diff_within_tolerance, target_window, CurrentTimeTolerance};
use super::{round_to, Observation, ObservationOutcome};
use crate::context::{DiagnosticBuffer, ObservationContext};

const NAME: &str = "[OF] Video only: The presentation starts with the earliest video sample and the audio sample that corresponds to the same presentation time.";

/// The frame shown when playback starts matches the first reported currentTime.
pub struct EarliestSampleSamePresentationTime;

impl Observation for EarliestSampleSamePresentationTime {
    fn name(&self) -> &'static str {
        NAME
    }

    fn evaluate(&self, ctx: &ObservationContext<'_>) -> Result<ObservationOutcome> {
        let events = ctx.mezzanine;
        if events.is_empty() {
            return Ok(ObservationResult::new(
                NAME,
                ObservationStatus::NotRun,
                "No QR mezzanine code detected.",
            )
            .into());
        }

        let tolerance = CurrentTimeTolerance::from_context(ctx)?;
        let mut diag = DiagnosticBuffer::new();
        diag.push(tolerance.describe());

        let first_play = ctx
            .statuses
            .windows(2)
            .find(|pair| pair[0].is_playing() && pair[0].last_action == "play");
        let Some(pair) = first_play else {
            diag.push("No play event detected.");
            return Ok(diag.into_result(NAME, ObservationStatus::NotRun).into());
        };

        let (status, next) = (&pair[0], &pair[1]);
        let window = target_window(status, next, &ctx.camera, events, tolerance.frame_tolerance);
        let (found, time_diff) = diff_within_tolerance(events, status, window, &tolerance);
        let result = if found {
            ObservationStatus::Pass
        } else {
            diag.push(format!(
                "Time difference between first Test Runner reported media currentTime and actual media time exceeded tolerance for following event: currentTime={} time_diff={}.",
                status.current_time,
                round_to(time_diff, 4)
            ));
            ObservationStatus::Fail
        };
        debug!(time_diff, status = %result, "Earliest sample checked");
        Ok(diag.into_result(NAME, result).into())
    }
}
