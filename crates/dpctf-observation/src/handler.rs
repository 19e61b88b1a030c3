//! Test handlers: per-kind expectations and the observation run.
//!
//! Every handler wraps a [`SequentialPlaybackBehavior`] holding the loaded
//! parameters and the sequential-playback defaults. Kinds that differ
//! override only the derivations that change, delegating the rest.

use std::borrow::Cow;
use std::ops::Range;

use tracing::{debug, info, warn};

use dpctf_core::{
    frame_at_ms, AudioSegment, DpctfError, FrameRate, MezzanineEvent, ObservationConfig,
    ObservationResult, ObservationStatus, ParametersDict, Result, StatusEvent,
};

use crate::config_parser::{ConfigurationParser, ContentTypes, TestDescriptor};
use crate::context::{
    AudioEvidence, AudioExpectations, CameraTiming, ExpectedDuration, ObservationContext,
    TestExpectations,
};
use crate::observations::ObservationKind;
use crate::playout::{expected_frame_num, total_playout_duration, FragmentDurations, PlayoutEntry};
use crate::test_kind::{ParameterSpec, TestKind, TestType};

/// Watermark ranges a test is expected to play, in mezzanine ms.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegmentData {
    pub content_id: String,
    pub expected: Range<f64>,
    /// Audio skipped by a random access, which must stay silent.
    pub unexpected: Option<Range<f64>>,
}

/// Everything recorded for one test.
#[derive(Debug, Clone, Copy)]
pub struct ObservationInput<'a> {
    pub mezzanine: &'a [MezzanineEvent],
    pub statuses: &'a [StatusEvent],
    pub audio_segments: &'a [AudioSegment],
    pub audio: Option<AudioEvidence<'a>>,
    pub camera: CameraTiming,
}

/// Loaded parameters and the derivations shared by every handler.
#[derive(Debug, Clone)]
pub struct SequentialPlaybackBehavior {
    pub kind: TestKind,
    pub content: ContentTypes,
    pub params: ParametersDict,
    pub audio_content_id: Option<String>,
}

impl SequentialPlaybackBehavior {
    /// Load every parameter the kind declares for the test's media.
    pub fn load(
        kind: TestKind,
        test: &TestDescriptor,
        parser: &ConfigurationParser,
    ) -> Result<Self> {
        let content = test.content_types();
        let spec = kind.parameter_spec(&content);
        let params = parser.load_parameters(&spec, test)?;
        debug!(test = kind.test_name(), parameters = params.len(), "Parameters loaded");
        Ok(Self::from_parts(kind, content, params, test.audio_content_id()))
    }

    pub fn from_parts(
        kind: TestKind,
        content: ContentTypes,
        params: ParametersDict,
        audio_content_id: Option<String>,
    ) -> Self {
        Self {
            kind,
            content,
            params,
            audio_content_id,
        }
    }

    pub fn cmaf_track_duration(&self) -> Result<f64> {
        self.params.get_f64("cmaf_track_duration")
    }

    /// Playout list under `key`, empty when the test has none.
    pub fn playout(&self, key: &str) -> Result<Vec<PlayoutEntry>> {
        if self.params.contains(key) {
            self.params.get(key)
        } else {
            Ok(Vec::new())
        }
    }

    pub fn first_frame_num(&self) -> i64 {
        1
    }

    /// Frame showing at the end of the track, sampled mid-frame.
    pub fn last_frame_num(&self, rate: &FrameRate) -> Result<i64> {
        Ok(expected_frame_num(self.cmaf_track_duration()?, rate, true))
    }

    pub fn expected_duration(&self) -> Result<ExpectedDuration> {
        Ok(ExpectedDuration::Single(self.cmaf_track_duration()?))
    }

    /// The whole track from the start, when the test plays audio.
    pub fn audio_from(&self, start_ms: f64) -> Result<Option<AudioSegmentData>> {
        let Some(content_id) = self.audio_content_id.clone().filter(|_| self.content.audio) else {
            return Ok(None);
        };
        Ok(Some(AudioSegmentData {
            content_id,
            expected: start_ms..self.cmaf_track_duration()?,
            unexpected: (start_ms > 0.0).then_some(0.0..start_ms),
        }))
    }

    /// Last frame of a playout's final fragment.
    fn last_frame_of_playout(&self, key: &str, rate: &FrameRate) -> Result<i64> {
        let playout = self.playout(key)?;
        let last = playout
            .last()
            .ok_or_else(|| DpctfError::Config(format!("Parameter '{key}' is empty")))?;
        let durations = FragmentDurations::from_params(&self.params)?;
        let track_duration = durations.for_entry(last)? * f64::from(last.fragment);
        Ok(expected_frame_num(track_duration, rate, true))
    }

    fn playout_duration(&self, key: &str) -> Result<f64> {
        let durations = FragmentDurations::from_params(&self.params)?;
        total_playout_duration(&self.playout(key)?, &durations)
    }
}

/// Per-kind derivations feeding the observations of one test.
pub trait TestHandler: Send + Sync {
    fn behavior(&self) -> &SequentialPlaybackBehavior;

    fn kind(&self) -> TestKind {
        self.behavior().kind
    }

    fn test_type(&self) -> TestType {
        self.kind().test_type()
    }

    fn parameters(&self) -> &ParametersDict {
        &self.behavior().params
    }

    fn init_parameters(&self) -> ParameterSpec {
        self.kind().parameter_spec(&self.behavior().content)
    }

    fn init_observations(&self) -> Vec<ObservationKind> {
        self.kind().observations(&self.behavior().content)
    }

    fn first_frame_num(&self, _rate: &FrameRate) -> Result<i64> {
        Ok(self.behavior().first_frame_num())
    }

    fn last_frame_num(&self, rate: &FrameRate) -> Result<i64> {
        self.behavior().last_frame_num(rate)
    }

    fn gap_frames(&self, _rate: &FrameRate) -> Result<Option<(i64, i64)>> {
        Ok(None)
    }

    fn save_expected_durations(&self) -> Result<ExpectedDuration> {
        self.behavior().expected_duration()
    }

    fn audio_segment_data(&self) -> Result<Option<AudioSegmentData>> {
        self.behavior().audio_from(0.0)
    }

    /// Expected values for a run whose mezzanine plays at `rate`.
    ///
    /// Frame numbers stay at zero when no mezzanine code was seen.
    fn expectations(
        &self,
        rate: Option<&FrameRate>,
        audio_sample_rate: u32,
    ) -> Result<TestExpectations> {
        let behavior = self.behavior();
        let params = &behavior.params;
        let mut expectations = TestExpectations {
            expected_duration: self.save_expected_durations()?,
            playout: behavior.playout("playout")?,
            second_playout: behavior.playout("second_playout")?,
            second_playout_switching_time: params.f64_or_zero("second_playout_switching_time")?,
            fragment_durations: FragmentDurations::from_params(params)?,
            ..TestExpectations::default()
        };
        if let Some(rate) = rate {
            expectations.first_frame_num = self.first_frame_num(rate)?;
            expectations.last_frame_num = self.last_frame_num(rate)?;
            expectations.gap_frames = self.gap_frames(rate)?;
        }
        if let Some(audio) = self.audio_segment_data()? {
            expectations.audio = Some(AudioExpectations {
                content_id: audio.content_id,
                sample_length_ms: params.get_f64("audio_sample_length")?,
                sample_rate: audio_sample_rate,
                expected_duration: audio.expected.end - audio.expected.start,
                starting_time: audio.expected.start,
                ending_time: audio.expected.end,
            });
        }
        Ok(expectations)
    }

    /// Run every observation of the test in order.
    ///
    /// Filtered audio segments returned by one observation replace the list
    /// seen by those after it. Fatal errors and missing or malformed
    /// parameters abort the run; any other failure is reported against the
    /// observation that raised it.
    fn make_observations(
        &self,
        input: &ObservationInput<'_>,
        config: &ObservationConfig,
    ) -> Result<Vec<ObservationResult>> {
        let rate = input.mezzanine.last().map(|e| e.frame_rate);
        let expectations = self.expectations(rate.as_ref(), config.audio.required_sample_rate)?;
        debug!(
            first_frame = expectations.first_frame_num,
            last_frame = expectations.last_frame_num,
            expected_duration = expectations.expected_duration.total(),
            "Expectations derived"
        );

        let mut audio_segments = Cow::Borrowed(input.audio_segments);
        let mut results = Vec::new();
        for kind in self.init_observations() {
            let observation = kind.build();
            let ctx = ObservationContext {
                test_type: self.test_type(),
                mezzanine: input.mezzanine,
                statuses: input.statuses,
                audio_segments: &audio_segments,
                params: self.parameters(),
                expectations: &expectations,
                config,
                camera: input.camera,
                audio: input.audio,
            };
            let result = match observation.evaluate(&ctx) {
                Ok(outcome) => {
                    if let Some(filtered) = outcome.audio_segments {
                        audio_segments = Cow::Owned(filtered);
                    }
                    outcome.result
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err @ DpctfError::Config(_)) => return Err(err),
                Err(DpctfError::Alignment(msg)) => {
                    warn!(observation = observation.name(), %msg, "Audio alignment failed");
                    ObservationResult::new(observation.name(), ObservationStatus::NotRun, msg)
                }
                Err(err) => {
                    warn!(observation = observation.name(), error = %err, "Observation failed");
                    ObservationResult::new(
                        observation.name(),
                        ObservationStatus::Error,
                        err.to_string(),
                    )
                }
            };
            info!(name = %result.name, status = %result.status, "Observation made");
            results.push(result);
        }
        Ok(results)
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Plays the whole track from the start. Also serves the kinds that only
/// differ in their observation list.
pub struct SequentialTrackPlayback(pub SequentialPlaybackBehavior);

impl TestHandler for SequentialTrackPlayback {
    fn behavior(&self) -> &SequentialPlaybackBehavior {
        &self.0
    }
}

/// Manually started playback, where the last frame rounds to the nearest.
pub struct SequentialTrackPlaybackManual(pub SequentialPlaybackBehavior);

impl TestHandler for SequentialTrackPlaybackManual {
    fn behavior(&self) -> &SequentialPlaybackBehavior {
        &self.0
    }

    fn last_frame_num(&self, rate: &FrameRate) -> Result<i64> {
        let seconds = self.0.cmaf_track_duration()? / 1000.0;
        Ok((seconds * dpctf_core::rate_as_f64(rate)).round() as i64)
    }
}

/// Starts at the beginning of fragment `random_access_fragment`.
pub struct RandomAccessToFragment(pub SequentialPlaybackBehavior);

impl RandomAccessToFragment {
    fn access_point_ms(&self) -> Result<f64> {
        let fragment = self.0.params.get_f64("random_access_fragment")?;
        Ok(fragment * self.0.params.get_f64("fragment_duration")?)
    }
}

impl TestHandler for RandomAccessToFragment {
    fn behavior(&self) -> &SequentialPlaybackBehavior {
        &self.0
    }

    fn first_frame_num(&self, rate: &FrameRate) -> Result<i64> {
        Ok(frame_at_ms(self.access_point_ms()?, rate) + 1)
    }

    fn save_expected_durations(&self) -> Result<ExpectedDuration> {
        Ok(ExpectedDuration::Single(
            self.0.cmaf_track_duration()? - self.access_point_ms()?,
        ))
    }

    fn audio_segment_data(&self) -> Result<Option<AudioSegmentData>> {
        self.0.audio_from(self.access_point_ms()?)
    }
}

/// Starts at `random_access_time` seconds.
pub struct RandomAccessToTime(pub SequentialPlaybackBehavior);

impl RandomAccessToTime {
    fn access_point_ms(&self) -> Result<f64> {
        Ok(self.0.params.get_f64("random_access_time")? * 1000.0)
    }
}

impl TestHandler for RandomAccessToTime {
    fn behavior(&self) -> &SequentialPlaybackBehavior {
        &self.0
    }

    fn first_frame_num(&self, rate: &FrameRate) -> Result<i64> {
        Ok(frame_at_ms(self.access_point_ms()?, rate) + 1)
    }

    fn save_expected_durations(&self) -> Result<ExpectedDuration> {
        Ok(ExpectedDuration::Single(
            self.0.cmaf_track_duration()? - self.access_point_ms()?,
        ))
    }

    fn audio_segment_data(&self) -> Result<Option<AudioSegmentData>> {
        self.0.audio_from(self.access_point_ms()?)
    }
}

/// Plays a multi-period playout; the track ends with its last period.
pub struct SplicePlayback(pub SequentialPlaybackBehavior);

impl TestHandler for SplicePlayback {
    fn behavior(&self) -> &SequentialPlaybackBehavior {
        &self.0
    }

    fn last_frame_num(&self, rate: &FrameRate) -> Result<i64> {
        self.0.last_frame_of_playout("playout", rate)
    }

    fn save_expected_durations(&self) -> Result<ExpectedDuration> {
        Ok(ExpectedDuration::Single(self.0.playout_duration("playout")?))
    }

    fn audio_segment_data(&self) -> Result<Option<AudioSegmentData>> {
        Ok(None)
    }
}

/// Plays the first presentation up to the switching time, then the second
/// presentation in full.
pub struct TruncatedPlaybackAndRestart(pub SequentialPlaybackBehavior);

impl TestHandler for TruncatedPlaybackAndRestart {
    fn behavior(&self) -> &SequentialPlaybackBehavior {
        &self.0
    }

    fn last_frame_num(&self, rate: &FrameRate) -> Result<i64> {
        self.0.last_frame_of_playout("second_playout", rate)
    }

    fn save_expected_durations(&self) -> Result<ExpectedDuration> {
        Ok(ExpectedDuration::Truncated {
            first: self.0.params.get_f64("second_playout_switching_time")? * 1000.0,
            second: self.0.playout_duration("second_playout")?,
        })
    }

    fn audio_segment_data(&self) -> Result<Option<AudioSegmentData>> {
        Ok(None)
    }
}

/// Skips a section of the track, by a seek or by missing media.
pub struct GapPlayback(pub SequentialPlaybackBehavior);

impl GapPlayback {
    /// Start and end of the gap, in seconds.
    fn gap_seconds(&self) -> Result<(f64, f64)> {
        let params = &self.0.params;
        if self.0.kind == TestKind::LowLatencyPlaybackOverGaps {
            let from = params.get_f64("min_buffer_duration")?;
            Ok((from, from + self.gap_length_ms()? / 1000.0))
        } else {
            Ok((
                params.get_f64("random_access_from")?,
                params.get_f64("random_access_to")?,
            ))
        }
    }

    fn gap_length_ms(&self) -> Result<f64> {
        let params = &self.0.params;
        if params.contains("gap_duration") {
            params.get_f64("gap_duration")
        } else {
            params.get_f64("fragment_duration")
        }
    }
}

impl TestHandler for GapPlayback {
    fn behavior(&self) -> &SequentialPlaybackBehavior {
        &self.0
    }

    fn gap_frames(&self, rate: &FrameRate) -> Result<Option<(i64, i64)>> {
        let (from, to) = self.gap_seconds()?;
        Ok(Some((
            frame_at_ms(from * 1000.0, rate),
            frame_at_ms(to * 1000.0, rate) + 1,
        )))
    }

    /// On demand playback never presents the skipped media.
    fn save_expected_durations(&self) -> Result<ExpectedDuration> {
        let mut duration = self.0.cmaf_track_duration()?;
        let vod = self.0.kind == TestKind::LowLatencyPlaybackOverGaps
            && self.0.params.get_str("playback_mode")? == "vod";
        if vod {
            duration -= self.gap_length_ms()?;
        }
        Ok(ExpectedDuration::Single(duration))
    }

    fn audio_segment_data(&self) -> Result<Option<AudioSegmentData>> {
        Ok(None)
    }
}

/// Wrap loaded parameters in the handler for their kind.
pub fn handler_for(behavior: SequentialPlaybackBehavior) -> Box<dyn TestHandler> {
    match behavior.kind {
        TestKind::SequentialTrackPlaybackManual
        | TestKind::FullscreenPlaybackOfSwitchingSetsManual
        | TestKind::OutOfOrderLoadingManual => Box::new(SequentialTrackPlaybackManual(behavior)),
        TestKind::RandomAccessToFragment | TestKind::RandomAccessOfAWavePresentation => {
            Box::new(RandomAccessToFragment(behavior))
        }
        TestKind::RandomAccessToTime => Box::new(RandomAccessToTime(behavior)),
        TestKind::PlaybackOverWaveBaselineSpliceConstraints
        | TestKind::SplicingOfWaveProgramWithBaselineConstraints
        | TestKind::SourceBufferReInitialization => Box::new(SplicePlayback(behavior)),
        TestKind::TruncatedPlaybackAndRestart => Box::new(TruncatedPlaybackAndRestart(behavior)),
        TestKind::LowLatencyPlaybackOverGaps | TestKind::RandomAccessFromOnePlaceToAnother => {
            Box::new(GapPlayback(behavior))
        }
        TestKind::SequentialTrackPlayback
        | TestKind::SwitchingSetPlayback
        | TestKind::MseAppendWindow
        | TestKind::BufferUnderrunAndRecovery
        | TestKind::LowLatencyInitialization
        | TestKind::RegularPlaybackOfCmafPresentation
        | TestKind::LongDurationPlayback => Box::new(SequentialTrackPlayback(behavior)),
    }
}

/// Resolve a `tests.json` entry into its handler, loading its parameters.
pub fn build_handler(
    test: &TestDescriptor,
    parser: &ConfigurationParser,
) -> Result<Box<dyn TestHandler>> {
    let kind = TestKind::resolve(&test.code, &test.path)?;
    info!(test_id = %test.test_id, test = kind.test_name(), "Test handler selected");
    let behavior = SequentialPlaybackBehavior::load(kind, test, parser)?;
    Ok(handler_for(behavior))
}
