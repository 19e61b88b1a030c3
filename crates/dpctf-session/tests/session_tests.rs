//! End-to-end session tests.
//!
//! Each test synthesizes the QR detections of a recorded session (a 10 s,
//! 30 fps mezzanine captured at 120 fps) and runs them through the
//! processor, checking the posted observation results.

use std::collections::BTreeMap;
use std::fs;

use serde_json::{json, Value};
use tempfile::TempDir;

use dpctf_core::{ObservationConfig, ObservationResult, ObservationStatus};
use dpctf_observation::ConfigurationParser;
use dpctf_session::{
    CaptureFrame, Detection, FileResultSink, FrameStreamProcessor, MemoryResultSink, VecSource,
};

// =============================================================================
// Helpers
// =============================================================================

const TEST_PATH: &str = "cfhd_12.5_25_50-local/sequential-track-playback__t1.html";
const CAMERA_FPS: f64 = 120.0;
const LAST_FRAME: u32 = 300;

fn parser() -> ConfigurationParser {
    ConfigurationParser::from_values(
        json!({
            "tests": {
                "T1": {
                    "path": TEST_PATH,
                    "code": "8.2",
                    "config": {"cmaf_track_duration": "PT10S"}
                }
            }
        }),
        json!({"all": {
            "ts_max": 120,
            "tolerance": 20,
            "frame_tolerance": 0,
            "duration_tolerance": 20,
            "duration_frame_tolerance": 1
        }}),
    )
}

fn mezzanine_code(frame: u32) -> String {
    let ms = (frame - 1) * 1000 / 30;
    format!("A1;00:00:{:02}.{:03};{frame:07};30", ms / 1000, ms % 1000)
}

fn status_code(status: &str, current_time: f64) -> String {
    json!({"s": status, "a": "play", "ct": current_time, "d": 0}).to_string()
}

/// Detections of one session, keyed by camera frame.
struct Recording {
    frames: BTreeMap<u64, Vec<String>>,
}

impl Recording {
    /// Pre-test code, `play` status, every mezzanine frame shown for four
    /// camera frames, a playing status each second and `finished` at the end.
    ///
    /// Frames in `dropped` never appear; frames after them are shown that
    /// much earlier.
    fn new(dropped: &[u32]) -> Self {
        let mut recording = Self {
            frames: BTreeMap::new(),
        };
        let pre_test = json!({"session_token": "tok", "test_id": "T1"}).to_string();
        for capture in 0..4 {
            recording.show(capture, pre_test.clone());
        }
        recording.show(12, status_code("playing", 0.0));

        let mut shift = 0u64;
        for frame in 1..=LAST_FRAME {
            if dropped.contains(&frame) {
                shift += 4;
                continue;
            }
            let first = 20 + 4 * u64::from(frame - 1) - shift;
            for capture in first..first + 4 {
                recording.show(capture, mezzanine_code(frame));
            }
        }
        for second in 1..10u64 {
            recording.show(20 + 120 * second + 2, status_code("playing", second as f64));
        }
        recording.show(20 + 4 * u64::from(LAST_FRAME) + 4, status_code("finished", 10.0));
        recording
    }

    fn show(&mut self, capture: u64, code: String) {
        self.frames.entry(capture).or_default().push(code);
    }

    fn source(&self) -> VecSource {
        let last = self.frames.keys().next_back().copied().unwrap_or(0);
        VecSource::new((0..=last).map(|capture| {
            let codes = self
                .frames
                .get(&capture)
                .into_iter()
                .flatten()
                .map(|code| Detection::new(code.clone(), [100.0, 100.0, 50.0, 50.0]))
                .collect();
            CaptureFrame::new(capture, codes)
        }))
    }
}

fn run(recording: &Recording) -> Vec<ObservationResult> {
    let mut processor = FrameStreamProcessor::new(
        ObservationConfig::default(),
        parser(),
        CAMERA_FPS,
        MemoryResultSink::new(),
    );
    let summary = processor.run(&mut recording.source()).unwrap();
    assert_eq!(summary.tests_observed, 1);

    let sink = processor.into_sink();
    assert_eq!(sink.posted.len(), 1);
    assert_eq!(sink.posted[0].session_token, "tok");
    sink.results_for(TEST_PATH).unwrap().to_vec()
}

fn find<'a>(results: &'a [ObservationResult], prefix: &str) -> &'a ObservationResult {
    results
        .iter()
        .find(|r| r.name.starts_with(prefix))
        .unwrap_or_else(|| panic!("no result starting with {prefix}"))
}

const EVERY_SAMPLE: &str = "[OF] Every sample S[k,s] shall be rendered";
const DURATION: &str = "[OF] The playback duration of the playback matches";

// =============================================================================
// Sequential playback
// =============================================================================

#[test]
fn test_clean_playback_passes_every_observation() {
    let results = run(&Recording::new(&[]));
    assert_eq!(results.len(), 4);
    for result in &results {
        assert_eq!(
            result.status,
            ObservationStatus::Pass,
            "{}: {}",
            result.name,
            result.message
        );
    }
}

#[test]
fn test_dropped_frames_fail_every_sample_and_duration() {
    let results = run(&Recording::new(&[150, 151, 152]));

    let every_sample = find(&results, EVERY_SAMPLE);
    assert_eq!(every_sample.status, ObservationStatus::Fail);
    assert!(
        every_sample
            .message
            .contains("Following frames are missing: 150 151 152"),
        "{}",
        every_sample.message
    );

    let duration = find(&results, DURATION);
    assert_eq!(duration.status, ObservationStatus::Fail);
    assert!(
        duration.message.contains("Playback duration 9900ms"),
        "{}",
        duration.message
    );
}

#[test]
fn test_missing_finished_status_observed_at_end_of_stream() {
    let mut recording = Recording::new(&[]);
    let last = *recording.frames.keys().next_back().unwrap();
    recording.frames.remove(&last);

    let results = run(&recording);
    assert!(find(&results, EVERY_SAMPLE).is_pass());
}

// =============================================================================
// Result files
// =============================================================================

#[test]
fn test_results_merged_into_session_file() {
    let dir = TempDir::new().unwrap();
    let session = dir.path().join("tok");
    fs::create_dir_all(&session).unwrap();
    let existing = json!({"results": [{
        "test": format!("/{TEST_PATH}"),
        "subtests": [{"name": "runner check", "status": "PASS"}]
    }]});
    fs::write(session.join("results.json"), existing.to_string()).unwrap();

    let config = ObservationConfig::default();
    let sink = FileResultSink::new(dir.path(), &config).unwrap();
    let mut processor = FrameStreamProcessor::new(config, parser(), CAMERA_FPS, sink);
    processor.run(&mut Recording::new(&[]).source()).unwrap();

    let text = fs::read_to_string(session.join("results.json")).unwrap();
    let data: Value = serde_json::from_str(&text).unwrap();
    let subtests = data["results"][0]["subtests"].as_array().unwrap();
    assert_eq!(subtests.len(), 5);
    assert_eq!(subtests[0]["name"], "runner check");
    assert!(subtests[1..]
        .iter()
        .all(|s| s["name"].as_str().unwrap().starts_with("[OF]")));
    assert!(data["meta"]["datetime_observation"].is_string());
}
