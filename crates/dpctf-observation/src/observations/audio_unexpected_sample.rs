use tracing::debug;

use dpctf_audio::{find_trim_start, SignalAligner, TrimParams};
use dpctf_core::{ObservationResult, ObservationStatus, Result};

use super::{fmt_num, Observation, ObservationOutcome, REPORT_NUM_OF_FAILURE};
use crate::context::{DiagnosticBuffer, ObservationContext};

const NAME: &str = "[OF] No audio sample earlier than random access shall be rendered.";

/// Audio preceding the random access point is never heard.
///
/// Each period of the skipped watermark is searched for in the part of the
/// recording before the expected audio begins. Periods that line up with
/// their neighbours were played.
pub struct AudioUnexpectedSampleNotRendered;

/// Offsets between consecutive period matches, in samples.
struct PeriodSpacing {
    diffs: Vec<i64>,
    period: i64,
    /// One millisecond of samples.
    tolerance: i64,
}

impl PeriodSpacing {
    fn one_period(&self, i: usize) -> bool {
        let value = self.diffs[i];
        value >= 0 && (value - self.period).abs() < self.tolerance
    }

    /// Two adjacent spacings of one period put three matches on a line.
    fn aligned(&self, i: usize) -> bool {
        let count = self.diffs.len();
        if self.one_period(i) {
            if i + 1 < count {
                self.one_period(i + 1)
            } else {
                i > 0 && self.one_period(i - 1)
            }
        } else {
            i + 2 < count && self.one_period(i + 1) && self.one_period(i + 2)
        }
    }
}

fn not_run(message: &str) -> ObservationOutcome {
    ObservationResult::new(NAME, ObservationStatus::NotRun, message).into()
}

impl Observation for AudioUnexpectedSampleNotRendered {
    fn name(&self) -> &'static str {
        NAME
    }

    fn evaluate(&self, ctx: &ObservationContext<'_>) -> Result<ObservationOutcome> {
        if ctx.audio_segments.is_empty() {
            return Ok(not_run("No audio segment is detected."));
        }
        let (Some(expectations), Some(evidence)) = (ctx.audio_expectations(), ctx.audio) else {
            return Ok(not_run("No audio recording is available."));
        };
        let Some(unexpected) = evidence.unexpected else {
            return Ok(not_run("No audio precedes the random access point."));
        };

        let period = expectations.observation_period();
        if period == 0 {
            return Ok(not_run("Audio sample length is not configured."));
        }
        let mut aligner = SignalAligner::new();
        let trim_to = find_trim_start(
            &mut aligner,
            evidence.subject,
            &evidence.expected.data,
            TrimParams {
                observation_period: period,
                check_count: ctx.config.audio.alignment_check_count,
            },
        )?;
        let pre_segment = &evidence.subject[..trim_to.min(evidence.subject.len())];

        let mut diffs = Vec::new();
        let mut previous = None;
        for chunk in unexpected.data.chunks_exact(period) {
            let timing = aligner.find_offset(pre_segment, chunk) as i64;
            diffs.push(previous.map_or(0, |p| timing - p));
            previous = Some(timing);
        }
        let spacing = PeriodSpacing {
            diffs,
            period: period as i64,
            tolerance: expectations.samples_per_ms() as i64,
        };

        let mut diag = DiagnosticBuffer::new();
        let mut errors = 0usize;
        for i in 0..spacing.diffs.len() {
            if !spacing.aligned(i) {
                continue;
            }
            errors += 1;
            let at = fmt_num(i as f64 * expectations.sample_length_ms);
            if errors == 1 {
                diag.push(format!("Unexpected audio samples detected at segment: {at}ms"));
            } else if errors <= REPORT_NUM_OF_FAILURE {
                diag.append(format!(", {at}ms"));
            } else if errors == REPORT_NUM_OF_FAILURE + 1 {
                diag.append(", ...too many unexpected audio samples detected");
            }
        }

        let status = if errors == 0 {
            diag.push("No audio sample earlier than random access were rendered.");
            ObservationStatus::Pass
        } else {
            diag.append(format!(". Total unexpected audio samples detected: {errors}"));
            ObservationStatus::Fail
        };
        debug!(
            trim_to,
            periods = spacing.diffs.len(),
            errors,
            %status,
            "Audio unexpected samples checked"
        );
        Ok(diag.into_result(NAME, status).into())
    }
}
