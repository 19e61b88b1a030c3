use tracing::debug;

use dpctf_core::{Location, MezzanineEvent, ObservationResult, ObservationStatus, Result};

use super::{playback_change_positions, round_to, Observation, ObservationOutcome};
use crate::context::{DiagnosticBuffer, ObservationContext};

const NAME: &str = "[OF] No visible shifts of objects in the video, no visible spatial offset of pixels in the video.";

/// Mezzanine QR code corners, indexed by `frame_number % 4`.
const QUADRANTS: [&str; 4] = ["top_left", "bottom_left", "bottom_right", "top_right"];

/// The QR code boxes keep their place and size across representation changes.
pub struct NoVisibleVideoShifts;

/// One event per quadrant, the first found in search order.
fn quadrant_batch<'a>(
    events: impl Iterator<Item = &'a MezzanineEvent>,
) -> [Option<&'a MezzanineEvent>; 4] {
    let mut batch = [None; 4];
    for event in events {
        let slot = &mut batch[(event.frame_number % 4) as usize];
        if slot.is_none() {
            *slot = Some(event);
        }
        if batch.iter().all(Option::is_some) {
            break;
        }
    }
    batch
}

fn missing_quadrants(batch: &[Option<&MezzanineEvent>; 4]) -> Vec<&'static str> {
    batch
        .iter()
        .zip(QUADRANTS)
        .filter(|(event, _)| event.is_none())
        .map(|(_, name)| name)
        .collect()
}

fn fmt_location(l: &Location) -> String {
    format!("[{}, {}, {}, {}]", l.left, l.top, l.width, l.height)
}

/// Compare averaged boxes quadrant by quadrant.
fn compare_batches(
    diag: &mut DiagnosticBuffer,
    backward: [&MezzanineEvent; 4],
    forward: [&MezzanineEvent; 4],
    tolerance: f64,
) -> bool {
    let mut all_match = true;
    for ((before, after), quadrant) in backward.iter().zip(forward.iter()).zip(QUADRANTS) {
        let b = before.average_location();
        let a = after.average_location();
        diag.push(format!(
            "QR code at position {quadrant}: backward {}, forward {}.",
            fmt_location(&b),
            fmt_location(&a)
        ));
        let diff_x = round_to((b.left - a.left).abs(), 2);
        let diff_y = round_to((b.top - a.top).abs(), 2);
        let diff_w = round_to((b.width - a.width).abs(), 2);
        let diff_h = round_to((b.height - a.height).abs(), 2);

        let mut matched = true;
        if diff_x > tolerance || diff_y > tolerance {
            matched = false;
            diag.push(format!(
                "QR code shifts with difference (x={diff_x},y={diff_y})."
            ));
        }
        if diff_w > tolerance {
            matched = false;
            diag.push(format!("QR code width resized with difference {diff_w}."));
        }
        if diff_h > tolerance {
            matched = false;
            diag.push(format!("QR code height resized with difference {diff_h}."));
        }
        if matched {
            diag.push("QR code positions match.");
        }
        all_match &= matched;
    }
    all_match
}

fn complete(batch: [Option<&MezzanineEvent>; 4]) -> Option<[&MezzanineEvent; 4]> {
    Some([batch[0]?, batch[1]?, batch[2]?, batch[3]?])
}

impl Observation for NoVisibleVideoShifts {
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

        let tolerance = ctx.params.f64_or_zero("video_shifts_tolerance")?;
        let max_search = ctx.config.video.max_search_frames_for_video_shift;
        let mut diag = DiagnosticBuffer::new();
        diag.push(format!("Video shifts tolerance is {tolerance} pixel."));

        let mut passed = true;
        let change_positions = playback_change_positions(events);
        for (n, &point) in change_positions.iter().enumerate().skip(1) {
            diag.push(format!("At switching point {n}:"));
            let from = point.saturating_sub(max_search);
            let until = (point + max_search).min(events.len());
            let backward = quadrant_batch(events[from..point].iter().rev());
            let forward = quadrant_batch(events[point..until].iter());

            let missing_after = missing_quadrants(&forward);
            if !missing_after.is_empty() {
                diag.push(format!(
                    "Cannot find {} QR code(s) after switch.",
                    missing_after.join(" ")
                ));
            }
            let missing_before = missing_quadrants(&backward);
            if !missing_before.is_empty() {
                diag.push(format!(
                    "Cannot find {} QR code(s) before switch.",
                    missing_before.join(" ")
                ));
            }

            match (complete(backward), complete(forward)) {
                (Some(backward), Some(forward)) => {
                    passed &= compare_batches(&mut diag, backward, forward, tolerance);
                }
                _ => passed = false,
            }
        }

        let status = if passed {
            ObservationStatus::Pass
        } else {
            ObservationStatus::Fail
        };
        let switches = change_positions.len().saturating_sub(1);
        debug!(switches, %status, "Video shifts checked");
        Ok(diag.into_result(NAME, status).into())
    }
}
