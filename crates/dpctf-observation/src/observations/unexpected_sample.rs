use tracing::debug;

use dpctf_core::{ObservationResult, ObservationStatus, Result};

use super::{Observation, ObservationOutcome};
use crate::context::{DiagnosticBuffer, ObservationContext};

const NAME: &str = "[OF] No video sample earlier than random access shall be rendered.";

/// Unexpected frames listed before the report is cut short.
const REPORT_UNEXPECTED: usize = 10;

/// Nothing before the random access point reaches the screen.
pub struct UnexpectedSampleNotRendered;

impl Observation for UnexpectedSampleNotRendered {
    fn name(&self) -> &'static str {
        NAME
    }

    fn evaluate(&self, ctx: &ObservationContext<'_>) -> Result<ObservationOutcome> {
        if ctx.mezzanine.is_empty() {
            return Ok(ObservationResult::new(
                NAME,
                ObservationStatus::NotRun,
                "No QR mezzanine code detected.",
            )
            .into());
        }

        let first_frame_num = ctx.expectations.first_frame_num;
        let unexpected: Vec<u32> = ctx
            .mezzanine
            .iter()
            .map(|e| e.frame_number)
            .filter(|&f| i64::from(f) < first_frame_num)
            .collect();

        let mut diag = DiagnosticBuffer::new();
        let status = if unexpected.is_empty() {
            diag.push("No unexpected frames were rendered.");
            ObservationStatus::Pass
        } else {
            diag.push("Following unexpected frames rendered:");
            for frame in unexpected.iter().take(REPORT_UNEXPECTED) {
                diag.append(format!(" {frame}"));
            }
            if unexpected.len() > REPORT_UNEXPECTED {
                diag.append("... too many unexpected frames detected.");
            }
            diag.push(format!(
                "Total unexpected frames rendered: {}.",
                unexpected.len()
            ));
            ObservationStatus::Fail
        };
        debug!(unexpected = unexpected.len(), %status, "Unexpected samples checked");
        Ok(diag.into_result(NAME, status).into())
    }
}
