use tracing::debug;

use dpctf_core::{ObservationResult, ObservationStatus, Result};

use super::start_up_delay::judge_delay;
use super::{Observation, ObservationOutcome};
use crate::context::{DiagnosticBuffer, ObservationContext};

const NAME: &str = "[OF] Measure the time between the successful appending of the first CMAF fragment and the first media sample is visible or audible. This value shall be compared against render_threshold.";

/// Status reported once the first fragment has been appended.
const FIRST_FRAGMENT_APPENDED: &str = "appended";

/// First frame is visible soon enough after the first fragment is appended.
pub struct RenderingDelayWithinThreshold;

impl Observation for RenderingDelayWithinThreshold {
    fn name(&self) -> &'static str {
        NAME
    }

    fn evaluate(&self, ctx: &ObservationContext<'_>) -> Result<ObservationOutcome> {
        let events = ctx.mezzanine;
        if events.len() < 2 {
            return Ok(ObservationResult::new(
                NAME,
                ObservationStatus::NotRun,
                format!("Too few mezzanine QR codes detected ({}).", events.len()),
            )
            .into());
        }

        let mut diag = DiagnosticBuffer::new();
        let appended = ctx
            .statuses
            .iter()
            .position(|s| s.status == FIRST_FRAGMENT_APPENDED)
            .and_then(|i| {
                let next = ctx.statuses.get(i + 1)?;
                Some(ctx.camera.status_time_ms(&ctx.statuses[i], next))
            });
        let Some(event_time) = appended else {
            diag.push(format!("'{FIRST_FRAGMENT_APPENDED}' event was not found."));
            return Ok(diag.into_result(NAME, ObservationStatus::NotRun).into());
        };

        let render_threshold = ctx.params.get_f64("render_threshold")?;
        let first_frame_time = ctx.camera.frame_to_ms(events[0].first_capture_frame);
        let status = judge_delay(
            &mut diag,
            first_frame_time - event_time,
            render_threshold,
            "rendering",
        );
        debug!(event_time, first_frame_time, %status, "Rendering delay checked");
        Ok(diag.into_result(NAME, status).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observations::fixtures::Fixture;
    use crate::test_support::{sequential_events, status};

    fn fixture(threshold: u32) -> Fixture {
        let mut fixture = Fixture::new(sequential_events(1..=30, 30, 36, 4))
            .param("render_threshold", threshold);
        fixture.statuses = vec![
            status("waiting", "play", 0.0, 0, 0),
            status("appended", "play", 0.0, 0, 12),
            status("playing", "play", 0.0, 0, 36),
        ];
        fixture
    }

    #[test]
    fn test_rendering_delay_within_threshold() {
        let result = RenderingDelayWithinThreshold
            .evaluate(&fixture(250).ctx())
            .unwrap()
            .result;
        assert!(result.is_pass(), "{}", result.message);
        assert!(result.message.ends_with("The presentation rendering delay is 200ms."));
    }

    #[test]
    fn test_rendering_delay_exceeds_threshold() {
        let result = RenderingDelayWithinThreshold
            .evaluate(&fixture(150).ctx())
            .unwrap()
            .result;
        assert_eq!(result.status, ObservationStatus::Fail);
    }

    #[test]
    fn test_missing_appended_not_run() {
        let mut fixture = fixture(250);
        fixture.statuses.retain(|s| s.status != "appended");
        let result = RenderingDelayWithinThreshold
            .evaluate(&fixture.ctx())
            .unwrap()
            .result;
        assert_eq!(result.status, ObservationStatus::NotRun);
        assert_eq!(result.message, "'appended' event was not found.");
    }
}
