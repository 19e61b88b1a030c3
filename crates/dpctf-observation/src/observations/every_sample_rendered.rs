use tracing::debug;

use dpctf_core::config::ToleranceConfig;
use dpctf_core::{
    frame_at_ms, rate_as_f64, DpctfError, MezzanineEvent, ObservationConfig, ObservationResult,
    ObservationStatus, ParametersDict, Result,
};

use super::{content_change_positions, playback_change_positions, Observation, ObservationOutcome};
use crate::context::{DiagnosticBuffer, ObservationContext, TestExpectations};
use crate::playout::{
    change_type_list, ending_playout_list, expected_frame_num, playout_sequence,
    starting_playout_list, switching_playout, switching_positions, ChangeType, FragmentDurations,
    PlayoutEntry, PositionKey,
};
use crate::test_kind::TestType;

const ESR_NAME: &str = "[OF] Every sample S[k,s] shall be rendered and the samples shall be rendered in increasing presentation time order.";
const ESR_CMAF_NAME: &str = "[OF] Video only: Every sample for every media type included in the CMAF Presentation duration shall be rendered and shall be rendered in order.";

/// Unexpected frames listed inside a playback gap before eliding the rest.
const GAP_FRAME_REPORT: usize = 10;

/// Every mezzanine frame is rendered, once and in order.
pub struct EverySampleRendered {
    name: &'static str,
}

impl EverySampleRendered {
    pub fn new() -> Self {
        Self { name: ESR_NAME }
    }

    /// Same check reported under the CMAF presentation name.
    pub fn in_cmaf_presentation() -> Self {
        Self {
            name: ESR_CMAF_NAME,
        }
    }
}

impl Default for EverySampleRendered {
    fn default() -> Self {
        Self::new()
    }
}

/// Missing-frame bookkeeping for one evaluation.
struct FrameChecker<'a> {
    tolerances: &'a ToleranceConfig,
    missing_frame_threshold: u32,
    missing_frame_count: i64,
    mid_missing_frame_count: i64,
    diag: DiagnosticBuffer,
}

impl<'a> FrameChecker<'a> {
    fn new(config: &'a ObservationConfig) -> Self {
        Self {
            tolerances: &config.tolerances,
            missing_frame_threshold: config.general.missing_frame_threshold,
            missing_frame_count: 0,
            mid_missing_frame_count: 0,
            diag: DiagnosticBuffer::new(),
        }
    }

    fn threshold_exceeded(&self) -> bool {
        self.missing_frame_threshold != 0
            && self.missing_frame_count > i64::from(self.missing_frame_threshold)
    }

    fn check_first_frame(&mut self, expected: i64, first: &MezzanineEvent) -> bool {
        let tolerance = self.tolerances.start_frame_num_tolerance;
        let missing = (i64::from(first.frame_number) - expected).abs();
        self.missing_frame_count += missing;
        if missing != 0 {
            self.diag.push(format!(
                "First frame found is {}, expected to start from {expected}. First frame number tolerance is {tolerance}.",
                first.frame_number
            ));
        }
        missing <= i64::from(tolerance)
    }

    fn check_last_frame(&mut self, expected: i64, last: &MezzanineEvent) -> bool {
        let tolerance = self.tolerances.end_frame_num_tolerance;
        let missing = (expected - i64::from(last.frame_number)).abs();
        self.missing_frame_count += missing;
        if missing != 0 {
            self.diag.push(format!(
                "Last frame found is {}, expected to end at {expected}. Last frame number tolerance is {tolerance}.",
                last.frame_number
            ));
        }
        missing <= i64::from(tolerance)
    }

    /// Consecutive frame numbers throughout `events`.
    ///
    /// Passes while the interior missing count over the whole evaluation
    /// stays within the mid tolerance; exceeding a non-zero missing frame
    /// threshold aborts the run.
    fn check_every_frame(
        &mut self,
        events: &[MezzanineEvent],
        playout_no: Option<u32>,
    ) -> Result<bool> {
        let tolerance = self.tolerances.mid_frame_num_tolerance;
        if !self.diag.contains("Mid frame number tolerance") {
            self.diag
                .push(format!("Mid frame number tolerance is {tolerance}."));
        }

        let mut consecutive = true;
        let mut missing_frames: Vec<u32> = Vec::new();
        let mut out_of_order: Vec<u32> = Vec::new();
        for pair in events.windows(2) {
            let previous = pair[0].frame_number;
            let current = pair[1].frame_number;
            if previous + 1 == current {
                continue;
            }
            consecutive = false;
            if self.threshold_exceeded() {
                continue;
            }
            if previous > current {
                self.diag
                    .push(format!("Frames out of order {previous}, {current}."));
                out_of_order.push(previous);
                out_of_order.push(current);
            } else {
                missing_frames.extend(previous + 1..current);
            }
        }
        for frame in out_of_order {
            if let Some(pos) = missing_frames.iter().position(|&f| f == frame) {
                missing_frames.remove(pos);
            }
        }

        self.mid_missing_frame_count += missing_frames.len() as i64;
        self.missing_frame_count += missing_frames.len() as i64;

        if !missing_frames.is_empty() {
            match playout_no {
                Some(n) => self
                    .diag
                    .push(format!("Following frames are missing in playout {n}:")),
                None => self.diag.push("Following frames are missing:"),
            }
            let mut print_range = missing_frames.len();
            if self.missing_frame_threshold != 0 {
                print_range = print_range.min(self.missing_frame_threshold as usize);
            }
            for frame in &missing_frames[..print_range] {
                self.diag.append(format!(" {frame}"));
            }
        }

        if self.threshold_exceeded() {
            let scope = playout_no
                .map(|n| format!(" in playout {n}"))
                .unwrap_or_default();
            self.diag.append(format!(
                "... too many missing frames, reporting truncated. Total of missing frames{scope} is {}. Device Observation Framework is exiting, and the following tests are not observed.",
                self.missing_frame_count
            ));
            return Err(DpctfError::Terminate(self.diag.as_str().to_string()));
        }

        Ok(consecutive || self.mid_missing_frame_count <= i64::from(tolerance))
    }

    /// Run [`Self::check_every_frame`] on each block between change positions.
    fn check_every_frame_by_block(
        &mut self,
        events: &[MezzanineEvent],
        change_positions: &[usize],
        playout_sequence: &[u32],
    ) -> Result<bool> {
        let mut result = true;
        for (i, &start) in change_positions.iter().enumerate() {
            let end = change_positions.get(i + 1).copied().unwrap_or(events.len());
            let block_ok =
                self.check_every_frame(&events[start..end], playout_sequence.get(i).copied())?;
            result &= block_ok;
        }
        Ok(result)
    }

    // =========================================================================
    // Switching sets
    // =========================================================================

    fn observe_switching(
        &mut self,
        events: &[MezzanineEvent],
        expectations: &TestExpectations,
    ) -> Result<bool> {
        let positions = switching_positions(
            &expectations.playout,
            &expectations.fragment_durations,
            PositionKey::Track,
        )?;
        let change_positions = playback_change_positions(events);
        if change_positions.len() != positions.len() {
            self.diag.push(format!(
                "Number of switches does not match. Test is configured to switch {} times. Actual number of switches is {}.",
                positions.len(),
                change_positions.len()
            ));
            return Ok(false);
        }

        let sequence = playout_sequence(&switching_playout(&expectations.playout));
        let mut result = self.check_every_frame_by_block(events, &change_positions, &sequence)?;

        for (i, &start) in change_positions.iter().enumerate().skip(1) {
            let previous = &events[start - 1];
            let current = &events[start];
            let ending = expected_frame_num(positions[i], &previous.frame_rate, true);
            if i64::from(previous.frame_number) != ending {
                result = false;
                self.diag.push(format!(
                    "Playout {} ending frame found is {}, expected to end with {ending}.",
                    sequence[i - 1],
                    previous.frame_number
                ));
            }
            let starting = expected_frame_num(positions[i], &current.frame_rate, true) + 1;
            if i64::from(current.frame_number) != starting {
                result = false;
                self.diag.push(format!(
                    "Playout {} starting frame found is {}, expected to start from {starting}.",
                    sequence[i], current.frame_number
                ));
            }
        }
        Ok(result)
    }

    // =========================================================================
    // Splicing
    // =========================================================================

    fn observe_splicing(
        &mut self,
        events: &[MezzanineEvent],
        expectations: &TestExpectations,
    ) -> Result<bool> {
        let playout = &expectations.playout;
        let durations = &expectations.fragment_durations;
        let change_positions = playback_change_positions(events);
        let change_types = change_type_list(playout);
        let endings = ending_playout_list(playout);
        let startings = starting_playout_list(playout);

        let configured = change_types.len() + 1;
        if change_positions.len() != configured {
            self.diag.push(format!(
                "Number of changes does not match the 'playout' configuration. Test is configured to change {configured} times. Actual number of change is {}.",
                change_positions.len()
            ));
            return Ok(false);
        }

        let splice_end_tolerance = i64::from(self.tolerances.splice_end_frame_num_tolerance);
        let splice_start_tolerance = i64::from(self.tolerances.splice_start_frame_num_tolerance);
        let mut result = true;
        for (i, &start) in change_positions.iter().enumerate() {
            let end = change_positions.get(i + 1).copied().unwrap_or(events.len());
            let block_ok = self.check_every_frame(&events[start..end], None)?;
            result &= block_ok;
            if i == 0 {
                continue;
            }

            let previous = &events[start - 1];
            let current = &events[start];
            let splicing = change_types[i - 1] == ChangeType::Splicing;

            let ending_entry = endings[i - 1];
            let ending_ms =
                f64::from(ending_entry.fragment) * durations.for_entry(&ending_entry)?;
            let ending = frame_at_ms(ending_ms, &previous.frame_rate);
            let ending_diff = (i64::from(previous.frame_number) - ending).abs();
            if splicing && ending_diff > splice_end_tolerance {
                result = false;
                self.diag.push(format!(
                    "Ending with incorrect frame when splicing at period number {i}. Ending frame found is {}, expected to end with {ending}. Splice end frame tolerance is {splice_end_tolerance}.",
                    previous.frame_number
                ));
            } else if !splicing && ending_diff > 0 {
                result = false;
                self.diag.push(format!(
                    "Ending with incorrect frame when switching at number {i}. Ending frame found is {}, expected to end with {ending}.",
                    previous.frame_number
                ));
            }

            let starting_entry = startings[i - 1];
            let starting_ms = f64::from(starting_entry.fragment.saturating_sub(1))
                * durations.for_entry(&starting_entry)?;
            let starting = frame_at_ms(starting_ms, &current.frame_rate) + 1;
            let starting_diff = (i64::from(current.frame_number) - starting).abs();
            if splicing && starting_diff > splice_start_tolerance {
                result = false;
                self.diag.push(format!(
                    "Starting from incorrect frame when splicing at period number {}. Starting frame found is {}, expected to start from {starting}. Splice start frame tolerance is {splice_start_tolerance}.",
                    i + 1,
                    current.frame_number
                ));
            } else if !splicing && starting_diff > 0 {
                result = false;
                self.diag.push(format!(
                    "Starting from incorrect frame when switching at number {}. Starting frame found is {}, expected to start from {starting}.",
                    i + 1,
                    current.frame_number
                ));
            }
        }
        Ok(result)
    }

    // =========================================================================
    // Gaps in playback
    // =========================================================================

    fn observe_gap(
        &mut self,
        events: &[MezzanineEvent],
        expectations: &TestExpectations,
        params: &ParametersDict,
    ) -> Result<bool> {
        let Some((gap_from, gap_to)) = expectations.gap_frames else {
            self.diag
                .push("Test configuration error: gap frames are not configured.");
            return Ok(false);
        };
        if gap_to < gap_from {
            self.diag.push(
                "Test configuration error: frame at the beginning of gap cannot be smaller than the ending of gap.",
            );
            return Ok(false);
        }

        let rate = rate_as_f64(&events[events.len() - 1].frame_rate);
        let mut adjusted_gap_from = gap_from as f64;
        let mut boundary_tolerance = None;
        for key in ["stall_tolerance_margin", "random_access_from_tolerance"] {
            if params.contains(key) {
                let frames = params.get_f64(key)? * rate / 1000.0;
                adjusted_gap_from += frames;
                boundary_tolerance.get_or_insert((key, frames));
            }
        }

        let end_index = events
            .iter()
            .position(|e| f64::from(e.frame_number) > adjusted_gap_from)
            .map(|x| x.saturating_sub(1))
            .unwrap_or(events.len() - 1);
        let start_index = (1..events.len())
            .rev()
            .find(|&x| i64::from(events[x].frame_number) < gap_to)
            .map(|x| x + 1)
            .unwrap_or(0);

        let mut result = self.check_every_frame(&events[..=end_index], None)?;
        if start_index >= events.len() {
            self.diag.push(format!(
                "No frame detected after gap, expected to resume from frame {gap_to}."
            ));
            return Ok(false);
        }
        let after_ok = self.check_every_frame(&events[start_index..], None)?;
        result &= after_ok;

        let last_before = i64::from(events[end_index].frame_number);
        if last_before != gap_from {
            match boundary_tolerance {
                Some((key, frames)) => {
                    let within = ((last_before - gap_from).abs() as f64) <= frames;
                    if within {
                        self.diag.push(format!(
                            "Last frame detected before gap {last_before} is within the tolerance of '{key}':{frames} frame of expected frame {gap_from}."
                        ));
                    } else {
                        result = false;
                        self.diag.push(format!(
                            "Last frame detected before gap {last_before} exceeded '{key}':{frames} frame of expected frame {gap_from}."
                        ));
                    }
                }
                None => {
                    result = false;
                    self.diag.push(format!(
                        "Last frame detected before gap {last_before} doesn't match expected frame {gap_from}."
                    ));
                }
            }
        }

        let first_after = i64::from(events[start_index].frame_number);
        if first_after != gap_to {
            result = false;
            self.diag.push(format!(
                "First frame detected after gap {first_after} doesn't match expected frame {gap_to}."
            ));
        }

        if end_index + 1 != start_index {
            result = false;
            let unexpected = &events[(end_index + 1).min(start_index)..start_index];
            self.diag.push(format!(
                "Samples within a gap shall not be rendered. {} number of following frames should not be rendered.",
                unexpected.len()
            ));
            for (x, event) in unexpected.iter().enumerate() {
                if x >= GAP_FRAME_REPORT {
                    if let Some(last) = unexpected.last() {
                        self.diag.append(format!(" ... {}.", last.frame_number));
                    }
                    break;
                }
                self.diag.append(format!(" {}", event.frame_number));
            }
        }
        Ok(result)
    }

    // =========================================================================
    // Truncated playback
    // =========================================================================

    /// Switch checks of one presentation, without the half frame term.
    fn check_presentation(
        &mut self,
        events: &[MezzanineEvent],
        playout: &[PlayoutEntry],
        durations: &FragmentDurations,
        label: &str,
    ) -> Result<bool> {
        let change_positions = playback_change_positions(events);
        let configured = change_type_list(playout).len() + 1;
        if change_positions.len() != configured {
            self.diag.push(format!(
                "For {label} presentation, number of changes does not match the 'playout' configuration. Test is configured to change {configured} times. Actual number of change is {}.",
                change_positions.len()
            ));
            return Ok(false);
        }

        let positions = switching_positions(playout, durations, PositionKey::SetAndTrack)?;
        let tracks: Vec<u32> = playout
            .first()
            .into_iter()
            .chain(starting_playout_list(playout).iter())
            .map(|e| e.track)
            .collect();
        let mut result = self.check_every_frame_by_block(events, &change_positions, &tracks)?;

        for (i, &start) in change_positions.iter().enumerate().skip(1) {
            let previous = &events[start - 1];
            let current = &events[start];
            let ending = expected_frame_num(positions[i], &previous.frame_rate, false);
            if i64::from(previous.frame_number) != ending {
                result = false;
                self.diag.push(format!(
                    "Playout {} ending frame found is {}, expected to end with {ending}.",
                    tracks[i - 1],
                    previous.frame_number
                ));
            }
            let starting = expected_frame_num(positions[i], &current.frame_rate, false) + 1;
            if i64::from(current.frame_number) != starting {
                result = false;
                self.diag.push(format!(
                    "Playout {} starting frame found is {}, expected to start from {starting}.",
                    tracks[i], current.frame_number
                ));
            }
        }
        Ok(result)
    }

    fn observe_truncated(
        &mut self,
        events: &[MezzanineEvent],
        expectations: &TestExpectations,
    ) -> Result<bool> {
        let content_positions = content_change_positions(events);
        if content_positions.len() != 2 {
            self.diag.push(format!(
                "Truncated test should change presentation once. Actual presentation change is {}.",
                content_positions.len()
            ));
            return Ok(false);
        }
        let (first, second) = events.split_at(content_positions[1]);
        let durations = &expectations.fragment_durations;

        let first_ok = self.check_presentation(first, &expectations.playout, durations, "1st")?;

        let mut end_ok = true;
        if let (Some(last), Some(last_entry)) = (first.last(), expectations.playout.last()) {
            let ending_from = frame_at_ms(
                expectations.second_playout_switching_time * 1000.0,
                &last.frame_rate,
            );
            let track_ms = durations.for_entry(last_entry)? * f64::from(last_entry.fragment);
            let ending_to = frame_at_ms(track_ms, &last.frame_rate);
            let found = i64::from(last.frame_number);
            if found < ending_from || found > ending_to {
                end_ok = false;
                self.diag.push(format!(
                    "1st presentation ending frame found is {found}, expected to end from {ending_from} to {ending_to}."
                ));
            }
        }

        let start_ok = second[0].frame_number == 1;
        if !start_ok {
            self.diag.push(format!(
                "2nd presentation starting frame found is {}, expected to start from 1.",
                second[0].frame_number
            ));
        }

        let second_ok =
            self.check_presentation(second, &expectations.second_playout, durations, "2nd")?;
        Ok(first_ok && end_ok && start_ok && second_ok)
    }
}

impl Observation for EverySampleRendered {
    fn name(&self) -> &'static str {
        self.name
    }

    fn evaluate(&self, ctx: &ObservationContext<'_>) -> Result<ObservationOutcome> {
        let events = ctx.mezzanine;
        if events.len() < 2 {
            return Ok(ObservationResult::new(
                self.name,
                ObservationStatus::NotRun,
                format!("Too few mezzanine QR codes detected ({}).", events.len()),
            )
            .into());
        }

        let expectations = ctx.expectations;
        let mut checker = FrameChecker::new(ctx.config);
        let first_ok = checker.check_first_frame(expectations.first_frame_num, &events[0]);
        let last_ok =
            checker.check_last_frame(expectations.last_frame_num, &events[events.len() - 1]);

        let mid_ok = match ctx.test_type {
            TestType::Switching => checker.observe_switching(events, expectations)?,
            TestType::Splicing => checker.observe_splicing(events, expectations)?,
            TestType::GapsInPlayback => checker.observe_gap(events, expectations, ctx.params)?,
            TestType::Truncated => checker.observe_truncated(events, expectations)?,
            TestType::Sequential | TestType::WaitingInPlayback => {
                checker.check_every_frame(events, None)?
            }
        };

        checker.diag.push(format!(
            "Total of missing frames is {}.",
            checker.missing_frame_count
        ));
        let status = if first_ok && last_ok && mid_ok {
            ObservationStatus::Pass
        } else {
            ObservationStatus::Fail
        };
        debug!(
            missing = checker.missing_frame_count,
            mid_missing = checker.mid_missing_frame_count,
            %status,
            "Every sample rendered checked"
        );
        Ok(checker.diag.into_result(self.name, status).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observations::fixtures::Fixture;
    use crate::test_support::sequential_events;

    fn sequential_fixture(frames: impl IntoIterator<Item = u32>, last: i64) -> Fixture {
        let mut fixture = Fixture::new(sequential_events(frames, 30, 100, 4));
        fixture.expectations.first_frame_num = 1;
        fixture.expectations.last_frame_num = last;
        fixture
    }

    fn evaluate(fixture: &Fixture) -> ObservationResult {
        EverySampleRendered::new()
            .evaluate(&fixture.ctx())
            .unwrap()
            .result
    }

    // =====================================================================
    // Sequential playback
    // =====================================================================

    #[test]
    fn test_sequential_run_passes() {
        let fixture = sequential_fixture(1..=300, 300);
        let result = evaluate(&fixture);
        assert_eq!(result.status, ObservationStatus::Pass);
        assert_eq!(
            result.message,
            "Mid frame number tolerance is 0. Total of missing frames is 0."
        );
        assert_eq!(result.name, ESR_NAME);
    }

    #[test]
    fn test_interior_drop_fails_at_zero_tolerance() {
        let frames = (1..=300).filter(|&f| f != 150);
        let fixture = sequential_fixture(frames, 300);
        let result = evaluate(&fixture);
        assert_eq!(result.status, ObservationStatus::Fail);
        assert!(result.message.contains("Following frames are missing: 150"));
        assert!(result.message.contains("Total of missing frames is 1."));
    }

    #[test]
    fn test_interior_drop_passes_at_tolerance_one() {
        let frames = (1..=300).filter(|&f| f != 150);
        let mut fixture = sequential_fixture(frames, 300);
        fixture.config.tolerances.mid_frame_num_tolerance = 1;
        let result = evaluate(&fixture);
        assert_eq!(result.status, ObservationStatus::Pass);
        assert!(result.message.contains("Mid frame number tolerance is 1."));
    }

    #[test]
    fn test_first_and_last_frame_tolerances() {
        let mut fixture = sequential_fixture(3..=298, 300);
        let result = evaluate(&fixture);
        assert_eq!(result.status, ObservationStatus::Fail);
        assert!(result
            .message
            .contains("First frame found is 3, expected to start from 1. First frame number tolerance is 0."));
        assert!(result.message.contains("Last frame found is 298, expected to end at 300."));
        assert!(result.message.contains("Total of missing frames is 4."));

        fixture.config.tolerances.start_frame_num_tolerance = 2;
        fixture.config.tolerances.end_frame_num_tolerance = 2;
        assert_eq!(evaluate(&fixture).status, ObservationStatus::Pass);
    }

    #[test]
    fn test_out_of_order_frames_reported() {
        let frames = [1, 2, 4, 3, 5, 6];
        let fixture = sequential_fixture(frames, 6);
        let result = evaluate(&fixture);
        assert!(result.message.contains("Frames out of order 4, 3."));
        assert!(!result.message.contains("missing:"));
    }

    #[test]
    fn test_threshold_breach_terminates() {
        let frames = (1..=100).filter(|&f| !(40..50).contains(&f));
        let mut fixture = sequential_fixture(frames, 100);
        fixture.config.general.missing_frame_threshold = 5;
        let err = EverySampleRendered::new()
            .evaluate(&fixture.ctx())
            .unwrap_err();
        match err {
            DpctfError::Terminate(message) => {
                assert!(message.contains("Following frames are missing: 40 41 42 43 44..."));
                assert!(message.contains("Total of missing frames is 10."));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_too_few_events_not_run() {
        let fixture = sequential_fixture(1..=1, 300);
        let result = evaluate(&fixture);
        assert_eq!(result.status, ObservationStatus::NotRun);
        assert_eq!(result.message, "Too few mezzanine QR codes detected (1).");
    }

    #[test]
    fn test_cmaf_presentation_name() {
        let fixture = sequential_fixture(1..=10, 10);
        let result = EverySampleRendered::in_cmaf_presentation()
            .evaluate(&fixture.ctx())
            .unwrap()
            .result;
        assert_eq!(result.name, ESR_CMAF_NAME);
        assert!(result.is_pass());
    }

    // =====================================================================
    // Switching and splicing
    // =====================================================================

    fn switching_fixture(second_start: u32) -> Fixture {
        // Track 1 for 2 s then track 2 (a different content id) for 2 s.
        let mut events = sequential_events(1..=60, 30, 0, 4);
        let mut second = sequential_events(second_start..=120, 30, 240, 4);
        for event in &mut second {
            event.content_id = "A2".to_string();
        }
        events.append(&mut second);
        let mut fixture = Fixture::new(events);
        fixture.test_type = TestType::Switching;
        fixture.expectations.first_frame_num = 1;
        fixture.expectations.last_frame_num = 120;
        fixture.expectations.playout = vec![
            PlayoutEntry::new(1, 1, 1),
            PlayoutEntry::new(1, 2, 2),
        ];
        fixture.expectations.fragment_durations.insert_track(1, 2000.0);
        fixture.expectations.fragment_durations.insert_track(2, 2000.0);
        fixture
    }

    #[test]
    fn test_switching_boundaries_pass() {
        let fixture = switching_fixture(61);
        let result = evaluate(&fixture);
        assert_eq!(result.status, ObservationStatus::Pass, "{}", result.message);
    }

    #[test]
    fn test_switching_wrong_starting_frame() {
        let fixture = switching_fixture(63);
        let result = evaluate(&fixture);
        assert_eq!(result.status, ObservationStatus::Fail);
        assert!(result
            .message
            .contains("Playout 2 starting frame found is 63, expected to start from 61."));
    }

    #[test]
    fn test_switching_count_mismatch() {
        let mut fixture = switching_fixture(61);
        fixture.expectations.playout.push(PlayoutEntry::new(1, 1, 3));
        let result = evaluate(&fixture);
        assert!(result.message.contains(
            "Number of switches does not match. Test is configured to switch 3 times. Actual number of switches is 2."
        ));
    }

    #[test]
    fn test_splice_tolerance_applies_to_splicing_only() {
        let mut fixture = switching_fixture(3);
        fixture.test_type = TestType::Splicing;
        fixture.expectations.last_frame_num = 120;
        fixture.expectations.playout = vec![
            PlayoutEntry::new(1, 1, 1),
            PlayoutEntry::new(2, 1, 1),
        ];
        fixture.expectations.fragment_durations = FragmentDurations::new();
        fixture
            .expectations
            .fragment_durations
            .insert_set_track(1, 1, 2000.0);
        fixture
            .expectations
            .fragment_durations
            .insert_set_track(2, 1, 2000.0);
        let result = evaluate(&fixture);
        assert!(result.message.contains(
            "Starting from incorrect frame when splicing at period number 2. Starting frame found is 3, expected to start from 1. Splice start frame tolerance is 0."
        ));

        fixture.config.tolerances.splice_start_frame_num_tolerance = 2;
        let result = evaluate(&fixture);
        assert!(!result.message.contains("Starting from incorrect frame"));
    }

    // =====================================================================
    // Gaps and truncation
    // =====================================================================

    #[test]
    fn test_gap_in_playback() {
        let frames = (1..=60).chain(91..=150);
        let mut fixture = sequential_fixture(frames, 150);
        fixture.test_type = TestType::GapsInPlayback;
        fixture.expectations.gap_frames = Some((60, 91));
        let result = evaluate(&fixture);
        assert_eq!(result.status, ObservationStatus::Pass, "{}", result.message);

        fixture.expectations.gap_frames = Some((60, 95));
        let result = evaluate(&fixture);
        assert_eq!(result.status, ObservationStatus::Fail);
        assert!(result.message.contains(
            "4 number of following frames should not be rendered. 91 92 93 94"
        ));
    }

    #[test]
    fn test_frames_rendered_inside_gap() {
        let mut fixture = sequential_fixture(1..=150, 150);
        fixture.test_type = TestType::GapsInPlayback;
        fixture.expectations.gap_frames = Some((60, 91));
        let result = evaluate(&fixture);
        assert_eq!(result.status, ObservationStatus::Fail);
        assert!(result.message.contains(
            "Samples within a gap shall not be rendered. 30 number of following frames should not be rendered. 61 62"
        ));
        assert!(result.message.contains(" ... 90."));
    }

    #[test]
    fn test_gap_configuration_error() {
        let mut fixture = sequential_fixture(1..=10, 10);
        fixture.test_type = TestType::GapsInPlayback;
        fixture.expectations.gap_frames = Some((8, 4));
        let result = evaluate(&fixture);
        assert!(result.message.contains("Test configuration error"));
        assert_eq!(result.status, ObservationStatus::Fail);
    }

    #[test]
    fn test_truncated_presentations() {
        // First presentation cut at 2.5 s, second played from frame 1.
        let mut events = sequential_events(1..=75, 30, 0, 4);
        let mut second = sequential_events(1..=60, 30, 300, 4);
        for event in &mut second {
            event.content_id = "B1".to_string();
        }
        events.append(&mut second);
        let mut fixture = Fixture::new(events);
        fixture.test_type = TestType::Truncated;
        fixture.expectations.first_frame_num = 1;
        fixture.expectations.last_frame_num = 60;
        fixture.expectations.playout = vec![PlayoutEntry::new(1, 1, 1), PlayoutEntry::new(1, 1, 2)];
        fixture.expectations.second_playout = vec![PlayoutEntry::new(2, 1, 1)];
        fixture.expectations.second_playout_switching_time = 2.5;
        fixture
            .expectations
            .fragment_durations
            .insert_set_track(1, 1, 2000.0);
        fixture
            .expectations
            .fragment_durations
            .insert_set_track(2, 1, 2000.0);
        let result = evaluate(&fixture);
        assert_eq!(result.status, ObservationStatus::Pass, "{}", result.message);

        fixture.mezzanine[75].frame_number = 2;
        fixture.mezzanine[76].frame_number = 3;
        let result = evaluate(&fixture);
        assert!(result
            .message
            .contains("2nd presentation starting frame found is 2, expected to start from 1."));
    }

    #[test]
    fn test_truncated_needs_one_content_change() {
        let mut fixture = sequential_fixture(1..=30, 30);
        fixture.test_type = TestType::Truncated;
        let result = evaluate(&fixture);
        assert!(result
            .message
            .contains("Truncated test should change presentation once. Actual presentation change is 1."));
    }
}
