use tracing::debug;

use dpctf_core::{ObservationResult, ObservationStatus, ParametersDict, Result};

use super::{content_change_positions, find_event, round_to, Observation, ObservationOutcome};
use crate::context::{DiagnosticBuffer, ObservationContext};
use crate::test_kind::TestType;

const NAME: &str =
    "[OF] The start-up delay should be sufficiently low, i.e., TR [k, 1] - Ti < TSMax.";
const TRUNCATED_NAME: &str = "[OF] The start-up delay for second presentation should be sufficiently low, i.e., TR [k, 1] - Ti < TSMax.";

/// First frame is rendered soon enough after `play`.
pub struct StartUpDelay;

/// Compare a measured delay against its maximum.
///
/// A negative delay means the sample was rendered before the triggering
/// action, which can only come from a mis-detection.
pub(crate) fn judge_delay(
    diag: &mut DiagnosticBuffer,
    delay: f64,
    maximum: f64,
    what: &str,
) -> ObservationStatus {
    let delay = round_to(delay, 4);
    if delay < 0.0 {
        diag.push(format!("The presentation {what} delay {delay}ms is negative."));
        return ObservationStatus::Fail;
    }
    diag.push(format!(
        "Maximum permitted {what} delay is {maximum}ms. The presentation {what} delay is {delay}ms."
    ));
    if delay < maximum {
        ObservationStatus::Pass
    } else {
        ObservationStatus::Fail
    }
}

/// `ts_max`, extended by how far into its fragment a random access lands.
pub(crate) fn permitted_start_up_delay(params: &ParametersDict) -> Result<f64> {
    let mut ts_max = params.get_f64("ts_max")?;
    if params.contains("random_access_time") && params.contains("fragment_duration") {
        let fragment_ms = params.get_f64("fragment_duration")?;
        if fragment_ms > 0.0 {
            let access_ms = params.get_f64("random_access_time")? * 1000.0;
            ts_max += access_ms % fragment_ms;
        }
    }
    Ok(ts_max)
}

pub(crate) fn event_not_found(action: &str) -> String {
    format!(
        "A test status QR code with first '{action}' last_action followed by a further test status QR code was not found."
    )
}

impl Observation for StartUpDelay {
    fn name(&self) -> &'static str {
        NAME
    }

    fn evaluate(&self, ctx: &ObservationContext<'_>) -> Result<ObservationOutcome> {
        let truncated = ctx.test_type == TestType::Truncated;
        let name = if truncated { TRUNCATED_NAME } else { NAME };
        let mut events = ctx.mezzanine;
        if events.len() < 2 {
            return Ok(ObservationResult::new(
                name,
                ObservationStatus::NotRun,
                format!("Too few mezzanine QR codes detected ({}).", events.len()),
            )
            .into());
        }

        let mut diag = DiagnosticBuffer::new();
        let action = if truncated {
            let changes = content_change_positions(events);
            if changes.len() != 2 {
                diag.push(format!(
                    "Truncated test should change presentation once. Actual presentation change is {}.",
                    changes.len()
                ));
                return Ok(diag.into_result(name, ObservationStatus::Fail).into());
            }
            events = &events[changes[1]..];
            "representation_change"
        } else {
            "play"
        };

        let Some(event_time) = find_event(action, ctx.statuses, &ctx.camera) else {
            diag.push(event_not_found(action));
            return Ok(diag.into_result(name, ObservationStatus::NotRun).into());
        };
        let Some(first_frame_time) = events
            .iter()
            .map(|e| ctx.camera.frame_to_ms(e.first_capture_frame))
            .find(|&t| t > event_time)
        else {
            diag.push(format!("No frame change detected after '{action}'."));
            return Ok(diag.into_result(name, ObservationStatus::Fail).into());
        };

        let ts_max = permitted_start_up_delay(ctx.params)?;
        let status = judge_delay(&mut diag, first_frame_time - event_time, ts_max, "start up");
        debug!(event_time, first_frame_time, %status, "Start-up delay checked");
        Ok(diag.into_result(name, status).into())
    }
}
