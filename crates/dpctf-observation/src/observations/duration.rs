use tracing::debug;

use dpctf_core::{
    frame_duration_ms, MezzanineEvent, ObservationResult, ObservationStatus, ParametersDict,
    Result, StatusEvent,
};

use super::{content_change_positions, find_event, round_to, Observation, ObservationOutcome};
use crate::context::{CameraTiming, DiagnosticBuffer, ExpectedDuration, ObservationContext};
use crate::test_kind::TestType;

const NAME: &str = "[OF] The playback duration of the playback matches the duration of the CMAF Track, i.e. TR [k, S] = TR [k, 1] + td[k].";

/// Optional tolerances added to the duration tolerance, in this order.
const EXTRA_TOLERANCES: [&str; 3] = [
    "mse_reset_tolerance",
    "stall_tolerance_margin",
    "random_access_from_tolerance",
];

/// Playback duration measured from the capture matches the CMAF track.
pub struct DurationMatchesCmafTrack;

/// Which ends of the detected run are adjusted for missing frames.
#[derive(Debug, Clone, Copy)]
struct Adjust {
    start: bool,
    end: bool,
}

/// Index of the first event rendered at or after the `play` action.
fn first_frame_after_play(
    events: &[MezzanineEvent],
    statuses: &[StatusEvent],
    camera: &CameraTiming,
) -> usize {
    let Some(play_time) = find_event("play", statuses, camera) else {
        return 0;
    };
    events
        .iter()
        .position(|e| camera.frame_to_ms(e.first_capture_frame) >= play_time)
        .unwrap_or(0)
}

/// Minimum and maximum time spent waiting, from playing/waiting transitions.
///
/// Waiting reported before playback first starts is ignored.
fn waiting_durations(statuses: &[StatusEvent], camera: &CameraTiming) -> (f64, f64) {
    let mut min = 0.0;
    let mut max = 0.0;
    let mut playing = None::<bool>;
    let mut waiting_start = 0.0;
    for (x, status) in statuses.iter().enumerate() {
        let Some(next) = statuses.get(x + 1) else {
            break;
        };
        match (playing, status.status.as_str()) {
            (None, "playing") => playing = Some(true),
            (Some(true), "waiting") => {
                waiting_start = camera.status_time_ms(status, next);
                playing = Some(false);
            }
            (Some(false), "playing") => {
                let waited = camera.status_time_ms(status, next) - waiting_start;
                min += waited - camera.frame_duration_ms;
                max += waited + camera.frame_duration_ms;
                playing = Some(true);
            }
            _ => {}
        }
    }
    (min, max)
}

struct DurationCheck<'a> {
    ctx: &'a ObservationContext<'a>,
    params: &'a ParametersDict,
    duration_tolerance: f64,
    duration_frame_tolerance: f64,
    waiting: Option<(f64, f64)>,
    diag: DiagnosticBuffer,
}

impl<'a> DurationCheck<'a> {
    fn check(
        &mut self,
        events: &[MezzanineEvent],
        mut expected: f64,
        adjust: Adjust,
    ) -> Result<bool> {
        let camera = &self.ctx.camera;
        let (first, last) = (&events[0], &events[events.len() - 1]);
        let last_frame_duration = frame_duration_ms(&last.frame_rate);
        let expectations = self.ctx.expectations;

        let mut base = first;
        let mut starting_missing = 0;
        let mut start_frames_taken_out = 0;
        if adjust.start {
            let play_index = first_frame_after_play(events, self.ctx.statuses, camera);
            starting_missing = i64::from(first.frame_number) - expectations.first_frame_num;
            start_frames_taken_out = starting_missing + play_index as i64;
            expected -= start_frames_taken_out as f64 * frame_duration_ms(&first.frame_rate);
            base = &events[play_index];
        }
        let mut ending_missing = 0;
        if adjust.end {
            ending_missing = expectations.last_frame_num - i64::from(last.frame_number);
            expected -= ending_missing as f64 * last_frame_duration;
        }

        let playback = (last.first_capture_frame as f64 - base.first_capture_frame as f64)
            * camera.frame_duration_ms
            + last_frame_duration;

        let mut tolerance =
            self.duration_tolerance + self.duration_frame_tolerance * last_frame_duration;
        for key in EXTRA_TOLERANCES {
            if self.params.contains(key) {
                tolerance += self.params.get_f64(key)?;
            }
        }

        let playback_r = round_to(playback, 2);
        let expected_r = round_to(expected, 2);

        if adjust.start && !adjust.end {
            let result = round_to(playback - expected, 6) >= 0.0;
            let negation = if result { "" } else { " not" };
            self.diag.push(format!(
                "Playback duration {playback_r}ms is{negation} equal to or greater than the duration of the expected track duration {expected_r}ms."
            ));
            return Ok(result);
        }

        // Capture times are sums of fractional frame durations.
        let diff = round_to((expected - playback).abs(), 6);
        let result = match self.waiting {
            Some((min, max)) => {
                let result = diff <= max + tolerance && diff >= min - tolerance;
                let (min_r, max_r) = (round_to(min, 2), round_to(max, 2));
                if result {
                    self.diag.push(format!(
                        "Playback duration is {playback_r}ms, expected track duration is {expected_r}ms."
                    ));
                } else {
                    self.diag.push(format!(
                        "Playback duration {playback_r}ms does not match expected duration {expected_r}ms."
                    ));
                }
                self.diag.push(format!(
                    "Minimum waiting duration is {min_r}ms, and maximum waiting duration is {max_r}ms."
                ));
                result
            }
            None if diff > tolerance => {
                self.diag.push(format!(
                    "Playback duration {playback_r}ms does not match expected duration {expected_r}ms +/- tolerance of {}ms.",
                    self.duration_tolerance
                ));
                false
            }
            None => {
                self.diag.push(format!(
                    "Playback duration is {playback_r}ms, expected track duration is {expected_r}ms."
                ));
                true
            }
        };

        self.diag.push(format!(
            "Allowed tolerance is {}ms and duration frame tolerance is {}.",
            self.duration_tolerance, self.duration_frame_tolerance
        ));
        if adjust.start {
            self.diag.push(format!(
                "Starting missing frame number is {starting_missing}. Starting frames to take out is {start_frames_taken_out}."
            ));
        }
        if adjust.end {
            self.diag
                .push(format!("Ending missing frame number is {ending_missing}."));
        }
        for key in EXTRA_TOLERANCES {
            if self.params.contains(key) {
                self.diag.push(format!(
                    "Additional allowed {key} is {}ms.",
                    self.params.get_f64(key)?
                ));
            }
        }
        Ok(result)
    }
}

impl Observation for DurationMatchesCmafTrack {
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

        let waiting = (ctx.test_type == TestType::WaitingInPlayback)
            .then(|| waiting_durations(ctx.statuses, &ctx.camera));
        let mut check = DurationCheck {
            ctx,
            params: ctx.params,
            duration_tolerance: ctx.params.get_f64("duration_tolerance")?,
            duration_frame_tolerance: ctx.params.get_f64("duration_frame_tolerance")?,
            waiting,
            diag: DiagnosticBuffer::new(),
        };

        let passed = match (ctx.test_type, &ctx.expectations.expected_duration) {
            (TestType::Truncated, ExpectedDuration::Truncated { first, second }) => {
                let changes = content_change_positions(events);
                if changes.len() != 2 {
                    check.diag.push(format!(
                        "Truncated test should change presentation once. Actual presentation change is {}.",
                        changes.len()
                    ));
                    false
                } else {
                    let (one, two) = events.split_at(changes[1]);
                    check.diag.push("First presentation:");
                    let first_ok = check.check(
                        one,
                        *first,
                        Adjust {
                            start: true,
                            end: false,
                        },
                    )?;
                    check.diag.push("Second presentation:");
                    let second_ok = check.check(
                        two,
                        *second,
                        Adjust {
                            start: false,
                            end: true,
                        },
                    )?;
                    first_ok && second_ok
                }
            }
            (_, expected) => check.check(
                events,
                expected.total(),
                Adjust {
                    start: true,
                    end: true,
                },
            )?,
        };

        let status = if passed {
            ObservationStatus::Pass
        } else {
            ObservationStatus::Fail
        };
        debug!(%status, "Duration checked");
        Ok(check.diag.into_result(NAME, status).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observations::fixtures::Fixture;
    use crate::test_support::{sequential_events, status};
    use dpctf_core::{DpctfError, ParametersDict};

    /// 10 s at 30 fps, each frame seen on 4 captures of a 120 fps camera.
    fn ten_seconds(frames: impl IntoIterator<Item = u32>) -> Fixture {
        let mut fixture = Fixture::new(sequential_events(frames, 30, 0, 4))
            .param("duration_tolerance", 0)
            .param("duration_frame_tolerance", 0);
        fixture.expectations.first_frame_num = 1;
        fixture.expectations.last_frame_num = 300;
        fixture.expectations.expected_duration = ExpectedDuration::Single(10_000.0);
        fixture
    }

    fn evaluate(fixture: &Fixture) -> ObservationResult {
        DurationMatchesCmafTrack
            .evaluate(&fixture.ctx())
            .unwrap()
            .result
    }

    #[test]
    fn test_full_playback_matches() {
        let fixture = ten_seconds(1..=300);
        let result = evaluate(&fixture);
        assert_eq!(result.status, ObservationStatus::Pass, "{}", result.message);
        assert!(result.message.starts_with(
            "Playback duration is 10000ms, expected track duration is 10000ms."
        ));
        assert!(result.message.contains("Ending missing frame number is 0."));
    }

    #[test]
    fn test_missing_end_frames_shorten_expectation() {
        let fixture = ten_seconds(1..=290);
        let result = evaluate(&fixture);
        assert!(result.is_pass(), "{}", result.message);
        assert!(result.message.contains("Ending missing frame number is 10."));
    }

    #[test]
    fn test_stalled_capture_fails_without_tolerance() {
        let mut fixture = ten_seconds(1..=300);
        // Freeze the last 30 frames for an extra second.
        for event in &mut fixture.mezzanine[270..] {
            event.first_capture_frame += 120;
            event.last_capture_frame += 120;
        }
        let result = evaluate(&fixture);
        assert_eq!(result.status, ObservationStatus::Fail);
        assert!(result.message.contains(
            "Playback duration 11000ms does not match expected duration 10000ms +/- tolerance of 0ms."
        ));

        let fixture = {
            let mut f = fixture;
            f.params.insert("duration_tolerance", 1000).unwrap();
            f
        };
        assert!(evaluate(&fixture).is_pass());
    }

    #[test]
    fn test_extra_tolerances_reported() {
        let fixture = ten_seconds(1..=300).param("stall_tolerance_margin", 50);
        let result = evaluate(&fixture);
        assert!(result
            .message
            .ends_with("Additional allowed stall_tolerance_margin is 50ms."));
    }

    #[test]
    fn test_frames_before_play_are_taken_out() {
        let mut fixture = ten_seconds(1..=300);
        // play issued at capture 40, frames 1..=10 shown before it.
        fixture.statuses = vec![
            status("playing", "play", 0.0, 0, 40),
            status("playing", "play", 0.1, 0, 44),
        ];
        let result = evaluate(&fixture);
        assert!(result.is_pass(), "{}", result.message);
        assert!(result.message.contains("Starting frames to take out is 10."));
    }

    #[test]
    fn test_waiting_in_playback_range() {
        let mut fixture = ten_seconds(1..=300);
        fixture.test_type = TestType::WaitingInPlayback;
        for event in &mut fixture.mezzanine[150..] {
            event.first_capture_frame += 240;
            event.last_capture_frame += 240;
        }
        fixture.statuses = vec![
            status("playing", "play", 0.0, 0, 0),
            status("waiting", "play", 5.0, 0, 600),
            status("playing", "play", 5.0, 0, 840),
            status("playing", "play", 5.1, 0, 850),
        ];
        let result = evaluate(&fixture);
        assert!(result.is_pass(), "{}", result.message);
        assert!(result.message.contains("Minimum waiting duration is 1991.67ms"));
    }

    #[test]
    fn test_too_few_events_not_run() {
        let fixture = ten_seconds(1..=1);
        assert_eq!(evaluate(&fixture).status, ObservationStatus::NotRun);
    }

    #[test]
    fn test_truncated_presentations() {
        let mut events = sequential_events(1..=75, 30, 0, 4);
        let mut second = sequential_events(1..=60, 30, 300, 4);
        for event in &mut second {
            event.content_id = "B1".to_string();
        }
        events.append(&mut second);
        let mut fixture = Fixture::new(events)
            .param("duration_tolerance", 0)
            .param("duration_frame_tolerance", 0);
        fixture.test_type = TestType::Truncated;
        fixture.expectations.first_frame_num = 1;
        fixture.expectations.last_frame_num = 60;
        fixture.expectations.expected_duration = ExpectedDuration::Truncated {
            first: 2500.0,
            second: 2000.0,
        };
        let result = evaluate(&fixture);
        assert!(result.is_pass(), "{}", result.message);
        assert!(result.message.starts_with("First presentation: Playback duration 2500ms is equal"));
        assert!(result.message.contains("Second presentation: Playback duration is 2000ms"));
    }

    #[test]
    fn test_missing_duration_frame_tolerance_is_config_error() {
        let mut fixture = ten_seconds(1..=300);
        fixture.params = ParametersDict::new();
        fixture.params.insert("duration_tolerance", 20).unwrap();
        let err = DurationMatchesCmafTrack
            .evaluate(&fixture.ctx())
            .unwrap_err();
        assert!(matches!(err, DpctfError::Config(_)), "{err}");
    }
}
