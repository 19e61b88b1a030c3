use tracing::debug;

use dpctf_core::{ObservationResult, ObservationStatus, Result};

use super::start_up_delay::{event_not_found, judge_delay, permitted_start_up_delay};
use super::{find_event, Observation, ObservationOutcome};
use crate::context::{DiagnosticBuffer, ObservationContext};

const NAME: &str = "[OF] Audio start-up-delay: The start-up delay shall be sufficiently low.";

/// First audio segment is heard soon enough after `play`.
pub struct AudioStartUpDelay;

impl Observation for AudioStartUpDelay {
    fn name(&self) -> &'static str {
        NAME
    }

    fn evaluate(&self, ctx: &ObservationContext<'_>) -> Result<ObservationOutcome> {
        let Some(first) = ctx.audio_segments.first() else {
            return Ok(ObservationResult::new(
                NAME,
                ObservationStatus::NotRun,
                "No audio segment is detected.",
            )
            .into());
        };

        let mut diag = DiagnosticBuffer::new();
        let Some(event_time) = find_event("play", ctx.statuses, &ctx.camera) else {
            diag.push(event_not_found("play"));
            return Ok(diag.into_result(NAME, ObservationStatus::NotRun).into());
        };
        // Segment timings count from the start of the test.
        let event_time = event_time - ctx.test_start_time();

        let ts_max = permitted_start_up_delay(ctx.params)?;
        let delay = first.audio_segment_timing - event_time;
        let status = judge_delay(&mut diag, delay, ts_max, "start up");
        debug!(event_time, delay, %status, "Audio start-up delay checked");
        Ok(diag.into_result(NAME, status).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observations::fixtures::Fixture;
    use crate::test_support::{audio_run, status};

    fn fixture(first_timing: f64) -> Fixture {
        let mut fixture = Fixture::new(Vec::new()).param("ts_max", 120);
        fixture.audio_segments = audio_run(10, 20.0, first_timing);
        // play generated at 100 ms on the 120 fps camera clock
        fixture.statuses = vec![
            status("ready", "play", 0.0, 0, 12),
            status("playing", "play", 0.0, 0, 30),
        ];
        fixture
    }

    #[test]
    fn test_quick_start_passes() {
        let result = AudioStartUpDelay
            .evaluate(&fixture(180.0).ctx())
            .unwrap()
            .result;
        assert!(result.is_pass(), "{}", result.message);
        assert_eq!(
            result.message,
            "Maximum permitted start up delay is 120ms. The presentation start up delay is 80ms."
        );
    }

    #[test]
    fn test_slow_start_fails() {
        let result = AudioStartUpDelay
            .evaluate(&fixture(400.0).ctx())
            .unwrap()
            .result;
        assert_eq!(result.status, ObservationStatus::Fail);
        assert!(result.message.ends_with("start up delay is 300ms."));
    }

    #[test]
    fn test_missing_inputs_not_run() {
        let mut fixture = fixture(180.0);
        fixture.statuses.clear();
        let result = AudioStartUpDelay.evaluate(&fixture.ctx()).unwrap().result;
        assert_eq!(result.status, ObservationStatus::NotRun);

        fixture.audio_segments.clear();
        let result = AudioStartUpDelay.evaluate(&fixture.ctx()).unwrap().result;
        assert_eq!(result.message, "No audio segment is detected.");
    }
}
