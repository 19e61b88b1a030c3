use dpctf_core::{DpctfError, Result};

use crate::config_parser::ContentTypes;
use crate::observations::ObservationKind;

/// Playback shape of a test, which selects the observation branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestType {
    Sequential,
    Switching,
    Splicing,
    Truncated,
    GapsInPlayback,
    WaitingInPlayback,
}

/// Parameters a handler needs, by source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSpec {
    /// From `test-config.json`; absence is a configuration error.
    pub required: Vec<&'static str>,
    /// From `test-config.json`; skipped when absent.
    pub optional: Vec<&'static str>,
    /// From the test's content config in `tests.json`.
    pub content: Vec<&'static str>,
}

const AUDIO_PARAMETERS: &[&str] = &[
    "audio_sample_length",
    "audio_tolerance",
    "audio_sample_tolerance",
    "duration_tolerance",
];
const AV_SYNC_OPTIONAL: &[&str] = &[
    "av_sync_margin",
    "av_sync_margin_tolerance",
    "av_sync_pass_rate",
];

fn join(parts: &[&[&'static str]]) -> Vec<&'static str> {
    parts.concat()
}

/// Every test the framework observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestKind {
    SequentialTrackPlayback,
    SequentialTrackPlaybackManual,
    RandomAccessToTime,
    RandomAccessToFragment,
    RandomAccessOfAWavePresentation,
    SwitchingSetPlayback,
    FullscreenPlaybackOfSwitchingSetsManual,
    PlaybackOverWaveBaselineSpliceConstraints,
    SplicingOfWaveProgramWithBaselineConstraints,
    SourceBufferReInitialization,
    TruncatedPlaybackAndRestart,
    MseAppendWindow,
    BufferUnderrunAndRecovery,
    LowLatencyInitialization,
    LowLatencyPlaybackOverGaps,
    RandomAccessFromOnePlaceToAnother,
    RegularPlaybackOfCmafPresentation,
    LongDurationPlayback,
    OutOfOrderLoadingManual,
}

impl TestKind {
    pub const ALL: [TestKind; 19] = [
        TestKind::SequentialTrackPlayback,
        TestKind::SequentialTrackPlaybackManual,
        TestKind::RandomAccessToTime,
        TestKind::RandomAccessToFragment,
        TestKind::RandomAccessOfAWavePresentation,
        TestKind::SwitchingSetPlayback,
        TestKind::FullscreenPlaybackOfSwitchingSetsManual,
        TestKind::PlaybackOverWaveBaselineSpliceConstraints,
        TestKind::SplicingOfWaveProgramWithBaselineConstraints,
        TestKind::SourceBufferReInitialization,
        TestKind::TruncatedPlaybackAndRestart,
        TestKind::MseAppendWindow,
        TestKind::BufferUnderrunAndRecovery,
        TestKind::LowLatencyInitialization,
        TestKind::LowLatencyPlaybackOverGaps,
        TestKind::RandomAccessFromOnePlaceToAnother,
        TestKind::RegularPlaybackOfCmafPresentation,
        TestKind::LongDurationPlayback,
        TestKind::OutOfOrderLoadingManual,
    ];

    /// Test page name used by the test runner.
    pub fn test_name(&self) -> &'static str {
        match self {
            TestKind::SequentialTrackPlayback => "sequential-track-playback",
            TestKind::SequentialTrackPlaybackManual => "sequential-track-playback-manual",
            TestKind::RandomAccessToTime => "random-access-to-time",
            TestKind::RandomAccessToFragment => "random-access-to-fragment",
            TestKind::RandomAccessOfAWavePresentation => "random-access-of-a-wave-presentation",
            TestKind::SwitchingSetPlayback => "switching-set-playback",
            TestKind::FullscreenPlaybackOfSwitchingSetsManual => {
                "fullscreen-playback-of-switching-sets-manual"
            }
            TestKind::PlaybackOverWaveBaselineSpliceConstraints => {
                "playback-over-wave-baseline-splice-constraints"
            }
            TestKind::SplicingOfWaveProgramWithBaselineConstraints => {
                "splicing-of-wave-program-with-baseline-constraints"
            }
            TestKind::SourceBufferReInitialization => {
                "source-buffer-re-initialization-without-changetype"
            }
            TestKind::TruncatedPlaybackAndRestart => "truncated-playback-and-restart",
            TestKind::MseAppendWindow => "mse-append-window",
            TestKind::BufferUnderrunAndRecovery => "buffer-underrun-and-recovery",
            TestKind::LowLatencyInitialization => "low-latency-initialization",
            TestKind::LowLatencyPlaybackOverGaps => "low-latency-playback-over-gaps",
            TestKind::RandomAccessFromOnePlaceToAnother => {
                "random-access-from-one-place-in-a-stream-to-a-different-place-in-the-same-stream"
            }
            TestKind::RegularPlaybackOfCmafPresentation => {
                "regular-playback-of-a-cmaf-presentation"
            }
            TestKind::LongDurationPlayback => "long-duration-playback",
            TestKind::OutOfOrderLoadingManual => "out-of-order-loading-manual",
        }
    }

    fn from_section(code: &str) -> Option<TestKind> {
        let kind = match code {
            "8.2" | "8.6" | "8.7" | "8.9" | "8.11" | "8.12" => TestKind::SequentialTrackPlayback,
            "8.3" => TestKind::RandomAccessToFragment,
            "8.4" => TestKind::RandomAccessToTime,
            "8.5" | "8.10" => TestKind::SwitchingSetPlayback,
            "8.8" | "8.13" | "8.14" => TestKind::PlaybackOverWaveBaselineSpliceConstraints,
            "8.16" => TestKind::SourceBufferReInitialization,
            "8.17" => TestKind::BufferUnderrunAndRecovery,
            "8.18" => TestKind::TruncatedPlaybackAndRestart,
            "8.19" => TestKind::LowLatencyInitialization,
            "8.20" => TestKind::LowLatencyPlaybackOverGaps,
            "8.21" => TestKind::MseAppendWindow,
            "8.22" => TestKind::RandomAccessFromOnePlaceToAnother,
            "9.2" => TestKind::RegularPlaybackOfCmafPresentation,
            "9.3" => TestKind::RandomAccessOfAWavePresentation,
            "9.4" => TestKind::SplicingOfWaveProgramWithBaselineConstraints,
            "9.6" => TestKind::LongDurationPlayback,
            _ => return None,
        };
        Some(kind)
    }

    fn page_name(path: &str) -> &str {
        let file = path.rsplit('/').next().unwrap_or(path);
        let file = file.strip_suffix(".html").unwrap_or(file);
        file.split("__").next().unwrap_or(file)
    }

    /// Resolve a test from its `tests.json` code and path.
    ///
    /// Manual pages share section codes with their automated counterparts,
    /// so a test page name in the path wins over the code.
    pub fn resolve(code: &str, path: &str) -> Result<TestKind> {
        let by_name = |name: &str| {
            let name = name.replace('_', "-");
            TestKind::ALL.into_iter().find(|k| k.test_name() == name)
        };
        by_name(Self::page_name(path))
            .or_else(|| by_name(code))
            .or_else(|| Self::from_section(code.trim()))
            .ok_or_else(|| DpctfError::Config(format!("Test '{code}' not supported!")))
    }

    pub fn test_type(&self) -> TestType {
        match self {
            TestKind::SwitchingSetPlayback => TestType::Switching,
            TestKind::PlaybackOverWaveBaselineSpliceConstraints
            | TestKind::SplicingOfWaveProgramWithBaselineConstraints
            | TestKind::SourceBufferReInitialization => TestType::Splicing,
            TestKind::TruncatedPlaybackAndRestart => TestType::Truncated,
            TestKind::LowLatencyPlaybackOverGaps | TestKind::RandomAccessFromOnePlaceToAnother => {
                TestType::GapsInPlayback
            }
            TestKind::BufferUnderrunAndRecovery => TestType::WaitingInPlayback,
            _ => TestType::Sequential,
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(
            self,
            TestKind::SequentialTrackPlaybackManual
                | TestKind::FullscreenPlaybackOfSwitchingSetsManual
                | TestKind::OutOfOrderLoadingManual
        )
    }

    // =========================================================================
    // Parameters
    // =========================================================================

    fn video_parameters(&self) -> ParameterSpec {
        const BASE: &[&str] = &[
            "ts_max",
            "tolerance",
            "frame_tolerance",
            "duration_tolerance",
            "duration_frame_tolerance",
        ];
        const DURATION: &[&str] = &[
            "tolerance",
            "frame_tolerance",
            "duration_tolerance",
            "duration_frame_tolerance",
        ];
        let (required, optional, content): (Vec<&str>, Vec<&str>, Vec<&str>) = match self {
            k if k.is_manual() => (BASE.to_vec(), vec![], vec!["cmaf_track_duration"]),
            TestKind::SequentialTrackPlayback
            | TestKind::MseAppendWindow
            | TestKind::RegularPlaybackOfCmafPresentation
            | TestKind::LongDurationPlayback => {
                (BASE.to_vec(), vec![], vec!["cmaf_track_duration"])
            }
            TestKind::RandomAccessToFragment | TestKind::RandomAccessOfAWavePresentation => (
                join(&[BASE, &["random_access_fragment"]]),
                vec![],
                vec!["cmaf_track_duration", "fragment_duration"],
            ),
            TestKind::RandomAccessToTime => (
                join(&[BASE, &["random_access_time"]]),
                vec![],
                vec!["cmaf_track_duration", "fragment_duration"],
            ),
            TestKind::SwitchingSetPlayback => (
                join(&[BASE, &["playout"]]),
                vec!["video_shifts_tolerance"],
                vec!["cmaf_track_duration", "fragment_duration_list"],
            ),
            TestKind::PlaybackOverWaveBaselineSpliceConstraints
            | TestKind::SplicingOfWaveProgramWithBaselineConstraints => (
                join(&[BASE, &["playout"]]),
                vec![],
                vec!["fragment_duration_multi_mpd"],
            ),
            TestKind::SourceBufferReInitialization => (
                join(&[&["mse_reset_tolerance"], DURATION, &["playout"]]),
                vec![],
                vec!["fragment_duration_multi_mpd"],
            ),
            TestKind::TruncatedPlaybackAndRestart => (
                join(&[
                    BASE,
                    &["playout", "second_playout", "second_playout_switching_time"],
                ]),
                vec![],
                vec!["fragment_duration_multi_mpd"],
            ),
            TestKind::BufferUnderrunAndRecovery => {
                (DURATION.to_vec(), vec![], vec!["cmaf_track_duration"])
            }
            TestKind::LowLatencyInitialization => (
                join(&[BASE, &["render_threshold"]]),
                vec![],
                vec!["cmaf_track_duration"],
            ),
            TestKind::RandomAccessFromOnePlaceToAnother => (
                vec![
                    "tolerance",
                    "frame_tolerance",
                    "random_access_to",
                    "random_access_from",
                    "random_access_from_tolerance",
                    "duration_tolerance",
                    "duration_frame_tolerance",
                ],
                vec![],
                vec!["cmaf_track_duration"],
            ),
            TestKind::LowLatencyPlaybackOverGaps => (
                vec![
                    "tolerance",
                    "frame_tolerance",
                    "duration_tolerance",
                    "duration_frame_tolerance",
                    "min_buffer_duration",
                    "playback_mode",
                    "stall_tolerance_margin",
                ],
                vec!["gap_duration"],
                vec!["cmaf_track_duration", "fragment_duration"],
            ),
            _ => (BASE.to_vec(), vec![], vec!["cmaf_track_duration"]),
        };
        ParameterSpec {
            required,
            optional,
            content,
        }
    }

    /// Parameters to load for this test given the media it plays.
    pub fn parameter_spec(&self, content: &ContentTypes) -> ParameterSpec {
        let mut spec = self.video_parameters();
        if content.audio && !self.audio_observations().is_empty() {
            for &p in AUDIO_PARAMETERS {
                if !spec.required.contains(&p) {
                    spec.required.push(p);
                }
            }
            if self.audio_range_needs_track_duration()
                && !spec.content.contains(&"cmaf_track_duration")
            {
                spec.content.push("cmaf_track_duration");
            }
        }
        if content.audio && content.video && self.has_av_sync() {
            spec.required.push("av_sync_tolerance");
            spec.optional.extend_from_slice(AV_SYNC_OPTIONAL);
        }
        spec
    }

    fn audio_range_needs_track_duration(&self) -> bool {
        !matches!(self.test_type(), TestType::Splicing | TestType::Truncated)
    }

    // =========================================================================
    // Observations
    // =========================================================================

    /// Video observations, in evaluation order.
    pub fn video_observations(&self) -> Vec<ObservationKind> {
        use ObservationKind::*;
        match self {
            TestKind::SequentialTrackPlayback
            | TestKind::SequentialTrackPlaybackManual
            | TestKind::FullscreenPlaybackOfSwitchingSetsManual
            | TestKind::OutOfOrderLoadingManual => {
                vec![EverySampleRendered, Duration, StartUpDelay, SampleMatches]
            }
            TestKind::RandomAccessToFragment | TestKind::RandomAccessToTime => vec![
                EverySampleRendered,
                Duration,
                StartUpDelay,
                SampleMatches,
                UnexpectedSample,
            ],
            TestKind::SwitchingSetPlayback => vec![
                EverySampleRendered,
                Duration,
                StartUpDelay,
                SampleMatches,
                NoVisibleVideoShifts,
            ],
            TestKind::PlaybackOverWaveBaselineSpliceConstraints
            | TestKind::TruncatedPlaybackAndRestart => {
                vec![EverySampleRendered, Duration, StartUpDelay, SampleMatches]
            }
            TestKind::SplicingOfWaveProgramWithBaselineConstraints
            | TestKind::RegularPlaybackOfCmafPresentation
            | TestKind::RandomAccessOfAWavePresentation => {
                vec![EverySampleRenderedInCmaf, Duration, EarliestSample]
            }
            TestKind::LongDurationPlayback => {
                vec![EverySampleRenderedInCmaf, Duration, SampleMatches]
            }
            TestKind::SourceBufferReInitialization
            | TestKind::MseAppendWindow
            | TestKind::BufferUnderrunAndRecovery
            | TestKind::RandomAccessFromOnePlaceToAnother
            | TestKind::LowLatencyPlaybackOverGaps => {
                vec![EverySampleRendered, Duration, SampleMatches]
            }
            TestKind::LowLatencyInitialization => {
                vec![EverySampleRendered, Duration, SampleMatches, RenderingDelay]
            }
        }
    }

    /// Audio observations, in evaluation order.
    pub fn audio_observations(&self) -> Vec<ObservationKind> {
        use ObservationKind::*;
        match self {
            TestKind::SequentialTrackPlayback | TestKind::SwitchingSetPlayback => vec![
                AudioEverySampleRendered,
                AudioDuration,
                AudioStartUpDelay,
                AudioSampleMatches,
            ],
            TestKind::RandomAccessToFragment | TestKind::RandomAccessToTime => vec![
                AudioEverySampleRendered,
                AudioDuration,
                AudioStartUpDelay,
                AudioSampleMatches,
                AudioUnexpectedSample,
            ],
            TestKind::MseAppendWindow
            | TestKind::LowLatencyInitialization
            | TestKind::BufferUnderrunAndRecovery
            | TestKind::LongDurationPlayback => {
                vec![AudioEverySampleRendered, AudioDuration, AudioSampleMatches]
            }
            TestKind::RegularPlaybackOfCmafPresentation => {
                vec![AudioEverySampleRendered, AudioDuration]
            }
            TestKind::RandomAccessOfAWavePresentation => vec![
                AudioEverySampleRendered,
                AudioDuration,
                AudioUnexpectedSample,
            ],
            _ => vec![],
        }
    }

    pub fn has_av_sync(&self) -> bool {
        matches!(
            self,
            TestKind::SequentialTrackPlayback
                | TestKind::SwitchingSetPlayback
                | TestKind::RegularPlaybackOfCmafPresentation
                | TestKind::LongDurationPlayback
        )
    }

    /// Every observation for the media the test plays, in evaluation order.
    pub fn observations(&self, content: &ContentTypes) -> Vec<ObservationKind> {
        let mut list = Vec::new();
        if content.video {
            list.extend(self.video_observations());
        }
        if content.audio {
            list.extend(self.audio_observations());
        }
        if content.audio && content.video && self.has_av_sync() {
            list.push(ObservationKind::AvSync);
        }
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUDIO_VIDEO: ContentTypes = ContentTypes {
        video: true,
        audio: true,
    };

    // =====================================================================
    // Resolution
    // =====================================================================

    #[test]
    fn test_resolve_by_section_code() {
        let kind = TestKind::resolve("8.3", "cfhd/random-access__t3.html").unwrap();
        assert_eq!(kind, TestKind::RandomAccessToFragment);
        assert_eq!(
            TestKind::resolve("9.4", "x.html").unwrap(),
            TestKind::SplicingOfWaveProgramWithBaselineConstraints
        );
    }

    #[test]
    fn test_resolve_manual_by_page_name() {
        let kind = TestKind::resolve(
            "8.2",
            "cfhd_12.5_25_50-local/sequential-track-playback-manual__t1.html",
        )
        .unwrap();
        assert_eq!(kind, TestKind::SequentialTrackPlaybackManual);
        assert!(kind.is_manual());
    }

    #[test]
    fn test_resolve_by_name_code() {
        assert_eq!(
            TestKind::resolve("out_of_order_loading_manual", "").unwrap(),
            TestKind::OutOfOrderLoadingManual
        );
        assert_eq!(
            TestKind::resolve("mse-append-window", "").unwrap(),
            TestKind::MseAppendWindow
        );
    }

    #[test]
    fn test_unsupported_code() {
        let err = TestKind::resolve("7.1", "a/b.html").unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: Test '7.1' not supported!");
    }

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<_> = TestKind::ALL.iter().map(|k| k.test_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), TestKind::ALL.len());
    }

    // =====================================================================
    // Tables
    // =====================================================================

    #[test]
    fn test_test_types() {
        assert_eq!(TestKind::SwitchingSetPlayback.test_type(), TestType::Switching);
        assert_eq!(TestKind::SourceBufferReInitialization.test_type(), TestType::Splicing);
        assert_eq!(
            TestKind::BufferUnderrunAndRecovery.test_type(),
            TestType::WaitingInPlayback
        );
        assert_eq!(
            TestKind::RandomAccessFromOnePlaceToAnother.test_type(),
            TestType::GapsInPlayback
        );
        assert_eq!(TestKind::OutOfOrderLoadingManual.test_type(), TestType::Sequential);
    }

    #[test]
    fn test_every_kind_checks_video_samples_first() {
        for kind in TestKind::ALL {
            let list = kind.video_observations();
            assert!(matches!(
                list[0],
                ObservationKind::EverySampleRendered | ObservationKind::EverySampleRenderedInCmaf
            ));
            assert_eq!(list[1], ObservationKind::Duration);
        }
    }

    #[test]
    fn test_audio_parameters_added_with_audio_content() {
        let video_only =
            TestKind::SequentialTrackPlayback.parameter_spec(&ContentTypes::default());
        assert!(!video_only.required.contains(&"audio_tolerance"));

        let spec = TestKind::SequentialTrackPlayback.parameter_spec(&AUDIO_VIDEO);
        assert!(spec.required.contains(&"audio_sample_length"));
        assert!(spec.required.contains(&"av_sync_tolerance"));
        assert!(spec.optional.contains(&"av_sync_pass_rate"));
        assert_eq!(
            spec.required.iter().filter(|p| **p == "duration_tolerance").count(),
            1
        );
    }

    #[test]
    fn test_every_kind_requires_video_tolerances() {
        for kind in TestKind::ALL {
            let spec = kind.parameter_spec(&ContentTypes::default());
            for key in [
                "tolerance",
                "frame_tolerance",
                "duration_tolerance",
                "duration_frame_tolerance",
            ] {
                assert!(spec.required.contains(&key), "{kind:?} lacks {key}");
            }
        }
    }

    #[test]
    fn test_observations_for_audio_and_video() {
        let list = TestKind::RandomAccessToTime.observations(&AUDIO_VIDEO);
        assert_eq!(list.len(), 10);
        assert_eq!(list[5], ObservationKind::AudioEverySampleRendered);
        assert!(!list.contains(&ObservationKind::AvSync));

        let list = TestKind::SequentialTrackPlayback.observations(&AUDIO_VIDEO);
        assert_eq!(list.last(), Some(&ObservationKind::AvSync));

        let audio_only = ContentTypes {
            video: false,
            audio: true,
        };
        let list = TestKind::SequentialTrackPlayback.observations(&audio_only);
        assert_eq!(list[0], ObservationKind::AudioEverySampleRendered);
    }

    #[test]
    fn test_splicing_without_audio_support() {
        let spec =
            TestKind::SplicingOfWaveProgramWithBaselineConstraints.parameter_spec(&AUDIO_VIDEO);
        assert!(!spec.required.contains(&"audio_tolerance"));
        assert!(TestKind::SplicingOfWaveProgramWithBaselineConstraints
            .observations(&AUDIO_VIDEO)
            .iter()
            .all(|o| !o.is_audio()));
    }
}
