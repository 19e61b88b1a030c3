use std::borrow::Cow;

use tracing::debug;

use dpctf_core::{
    frame_duration_ms, rate_as_f64, MezzanineEvent, ObservationResult, ObservationStatus, Result,
    StatusEvent,
};

use super::{
    playback_change_positions, round_to, Observation, ObservationOutcome,
    CAMERA_FRAME_ADJUSTMENT, REPORT_NUM_OF_FAILURE,
};
use crate::context::{CameraTiming, DiagnosticBuffer, ObservationContext};
use crate::playout::{
    change_type_list, splicing_period_list, starting_playout_list, ChangeType, PlayoutEntry,
};
use crate::test_kind::TestType;

const NAME: &str = "[OF] The presented sample matches the one reported by the currentTime value within the tolerance of the sample duration.";

/// Rendered frame matches the currentTime reported with each status.
pub struct SampleMatchesCurrentTime;

/// Tolerances shared by the current time checks.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CurrentTimeTolerance {
    /// Milliseconds.
    pub tolerance: f64,
    /// Mezzanine frames.
    pub frame_tolerance: f64,
}

impl CurrentTimeTolerance {
    pub fn from_context(ctx: &ObservationContext<'_>) -> Result<Self> {
        Ok(Self {
            tolerance: ctx.params.get_f64("tolerance")?,
            frame_tolerance: ctx.params.get_f64("frame_tolerance")?,
        })
    }

    pub fn describe(&self) -> String {
        format!(
            "Allowed tolerance is {} frames, {}ms.",
            self.frame_tolerance, self.tolerance
        )
    }
}

/// Fractional capture frame range that may show the frame reported by `status`.
pub(crate) fn target_window(
    status: &StatusEvent,
    next: &StatusEvent,
    camera: &CameraTiming,
    events: &[MezzanineEvent],
    frame_tolerance: f64,
) -> (f64, f64) {
    let target = status.capture_frame_num as f64 - next.delay as f64 / camera.frame_duration_ms;

    // Rate of the frame on screen at the target.
    let visible = events
        .iter()
        .position(|e| e.first_capture_frame as f64 > target)
        .map(|i| i.saturating_sub(1))
        .unwrap_or(0);
    let mezzanine_rate = events
        .get(visible)
        .map(|e| rate_as_f64(&e.frame_rate))
        .unwrap_or(camera.frame_rate);

    let spread = CAMERA_FRAME_ADJUSTMENT + frame_tolerance * camera.frame_rate / mezzanine_rate;
    (target - spread, target + spread)
}

/// Smallest media time difference of the frames visible inside the window.
///
/// Returns whether a frame matched within tolerance, and the difference
/// found.
pub(crate) fn diff_within_tolerance(
    events: &[MezzanineEvent],
    status: &StatusEvent,
    window: (f64, f64),
    tolerance: &CurrentTimeTolerance,
) -> (bool, f64) {
    let (first_possible, last_possible) = window;
    let current_time_ms = status.current_time * 1000.0;
    let mut time_diff = f64::MAX;
    for event in events {
        let appear_from = event.first_capture_frame as f64 - CAMERA_FRAME_ADJUSTMENT;
        let appear_till = event.last_capture_frame as f64 + CAMERA_FRAME_ADJUSTMENT;
        if first_possible > appear_till || last_possible < appear_from {
            continue;
        }
        time_diff = time_diff.min((event.media_time - current_time_ms).abs());
        let allowed = tolerance.tolerance
            + tolerance.frame_tolerance * frame_duration_ms(&event.frame_rate);
        if time_diff <= allowed {
            return (true, time_diff);
        }
    }
    (false, time_diff)
}

/// Events with media times on the spliced presentation timeline.
///
/// Every splicing period carries its own mezzanine media time, so frames
/// after a splice are shifted to where that period starts in the
/// presentation.
fn on_presentation_timeline<'a>(
    ctx: &ObservationContext<'a>,
) -> Result<Cow<'a, [MezzanineEvent]>> {
    let events = ctx.mezzanine;
    if ctx.test_type != TestType::Splicing {
        return Ok(Cow::Borrowed(events));
    }
    let playout = &ctx.expectations.playout;
    let durations = &ctx.expectations.fragment_durations;
    let period_starts = splicing_period_list(playout, durations)?;
    let splice_entries: Vec<PlayoutEntry> = change_type_list(playout)
        .into_iter()
        .zip(starting_playout_list(playout))
        .filter(|(change, _)| *change == ChangeType::Splicing)
        .map(|(_, entry)| entry)
        .collect();
    let mut offsets = Vec::with_capacity(splice_entries.len());
    for (start, entry) in period_starts.iter().zip(&splice_entries) {
        let media_start =
            f64::from(entry.fragment.saturating_sub(1)) * durations.for_entry(entry)?;
        offsets.push(start - media_start);
    }
    let change_types = change_type_list(playout);

    let mut shifted = events.to_vec();
    let mut applied = 0.0;
    let mut splices = offsets.into_iter();
    for (change_no, &position) in playback_change_positions(events).iter().enumerate().skip(1) {
        if change_types.get(change_no - 1) != Some(&ChangeType::Splicing) {
            continue;
        }
        let Some(offset) = splices.next() else {
            break;
        };
        for event in &mut shifted[position..] {
            event.media_time += offset - applied;
        }
        applied = offset;
    }
    Ok(Cow::Owned(shifted))
}

fn is_current_time_event(status: &StatusEvent) -> bool {
    status.is_playing()
        && (status.last_action == "play" || status.last_action == "representation_change")
}

impl Observation for SampleMatchesCurrentTime {
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

        let tolerance = CurrentTimeTolerance::from_context(ctx)?;
        let skip_zero = ctx.params.contains("render_threshold");
        let events = on_presentation_timeline(ctx)?;

        let mut diag = DiagnosticBuffer::new();
        diag.push(tolerance.describe());

        let mut checked = 0usize;
        let mut failures = 0usize;
        let candidates = ctx
            .statuses
            .windows(2)
            .filter(|pair| is_current_time_event(&pair[0]))
            .skip(1);
        for pair in candidates {
            let (status, next) = (&pair[0], &pair[1]);
            if skip_zero && status.current_time == 0.0 {
                continue;
            }
            checked += 1;
            let window = target_window(
                status,
                next,
                &ctx.camera,
                &events,
                tolerance.frame_tolerance,
            );
            let (found, time_diff) = diff_within_tolerance(&events, status, window, &tolerance);
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
            diag.push(format!(
                "...too many failures, reporting truncated. Total failure count is {failures}."
            ));
        }

        let status = if checked == 0 {
            diag.push("No currentTime reported while playing.");
            ObservationStatus::NotRun
        } else if failures > 0 {
            ObservationStatus::Fail
        } else {
            ObservationStatus::Pass
        };
        debug!(checked, failures, %status, "Sample matches current time checked");
        Ok(diag.into_result(NAME, status).into())
    }
}
