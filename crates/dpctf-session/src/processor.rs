//! Frame-stream processor: per-test event accumulation and finalization.
//!
//! Detections are translated and deduplicated frame by frame. A pre-test
//! code with a new test id finalizes the running test and loads the next
//! one; a `finished` status and the end of the stream finalize as well.

use tracing::{debug, info, warn};

use dpctf_audio::{
    decode_segments, AudioError, DecodedAudio, MezzanineLibrary, MezzanineSegment, Recording,
};
use dpctf_core::{
    rate_as_f64, AudioSegment, DpctfError, MezzanineEvent, ObservationConfig, ObservationResult,
    ObservationStatus, ParametersDict, PreTestEvent, Result, StatusEvent,
};
use dpctf_observation::{
    build_handler, AudioEvidence, AudioSegmentData, CameraTiming, ConfigurationParser,
    ObservationInput, TestDescriptor, TestHandler,
};
use dpctf_qr::{DecodedQr, QrTranslator};

use crate::results::ResultSink;
use crate::source::{CaptureFrame, FrameSource};

/// Name of the result reported when a run is aborted mid-test.
pub const TERMINATION_RESULT_NAME: &str = "[OF] Too many missing frames are found.";

/// Session audio: the recording and the watermark files it is matched against.
pub struct AudioInputs {
    pub recording: Recording,
    pub library: MezzanineLibrary,
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub frames_processed: u64,
    pub tests_observed: usize,
    /// A timeout ended the session before the last frame.
    pub stopped_early: bool,
}

struct ActiveTest {
    descriptor: TestDescriptor,
    handler: Box<dyn TestHandler>,
    /// Camera frame the pre-test code was first seen on.
    start_frame: u64,
    observed: bool,
}

/// Aborts the run when mezzanine codes stop appearing mid-test.
///
/// Counting starts with the first mezzanine code of a test and stops at
/// its `finished` status. The limit is configured in mezzanine frames and
/// converted to camera frames using the latest mezzanine frame rate.
#[derive(Debug)]
struct MissingQrGuard {
    threshold_frames: u32,
    camera_fps: f64,
    limit: u64,
    count: u64,
    test_started: bool,
    counting: bool,
}

impl MissingQrGuard {
    fn new(threshold_frames: u32, camera_fps: f64) -> Self {
        Self {
            threshold_frames,
            camera_fps,
            limit: 0,
            count: 0,
            test_started: false,
            counting: false,
        }
    }

    fn observe(&mut self, capture_frame: u64, decoded: &[DecodedQr]) -> Result<()> {
        let mut mezzanine_seen = false;
        for code in decoded {
            match code {
                DecodedQr::Mezzanine(event) => {
                    mezzanine_seen = true;
                    self.count = 0;
                    let frames = f64::from(self.threshold_frames) * self.camera_fps
                        / rate_as_f64(&event.frame_rate);
                    self.limit = frames.round() as u64;
                    if self.test_started {
                        self.counting = true;
                    }
                }
                DecodedQr::Status(status) if status.is_finished() => {
                    self.test_started = false;
                    self.counting = false;
                }
                DecodedQr::PreTest(_) => self.test_started = true,
                DecodedQr::Status(_) => {}
            }
        }
        if self.counting && !mezzanine_seen {
            self.count += 1;
        }
        if self.limit != 0 && self.count > self.limit {
            return Err(DpctfError::Terminate(format!(
                "At camera frame {capture_frame} there were {} consecutive camera frames where no mezzanine qr codes were detected. Device Observation Framework is exiting, and the remaining tests are not observed.",
                self.count
            )));
        }
        Ok(())
    }
}

/// Single-threaded processor for one recorded session.
pub struct FrameStreamProcessor<S: ResultSink> {
    config: ObservationConfig,
    parser: ConfigurationParser,
    camera: CameraTiming,
    translator: QrTranslator,
    sink: S,
    audio: Option<AudioInputs>,
    mezzanine: Vec<MezzanineEvent>,
    statuses: Vec<StatusEvent>,
    pre_test: Option<PreTestEvent>,
    active: Option<ActiveTest>,
    last_finished_frame: Option<u64>,
    no_qr_since: Option<u64>,
    missing_qr: MissingQrGuard,
    summary: SessionSummary,
}

impl<S: ResultSink> FrameStreamProcessor<S> {
    pub fn new(
        config: ObservationConfig,
        parser: ConfigurationParser,
        camera_fps: f64,
        sink: S,
    ) -> Self {
        let missing_qr =
            MissingQrGuard::new(config.general.consecutive_no_qr_threshold, camera_fps);
        Self {
            config,
            parser,
            camera: CameraTiming::new(camera_fps),
            translator: QrTranslator::new(),
            sink,
            audio: None,
            mezzanine: Vec::new(),
            statuses: Vec::new(),
            pre_test: None,
            active: None,
            last_finished_frame: None,
            no_qr_since: None,
            missing_qr,
            summary: SessionSummary::default(),
        }
    }

    /// Decode audio for tests that play it.
    pub fn with_audio(mut self, audio: AudioInputs) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn summary(&self) -> &SessionSummary {
        &self.summary
    }

    /// Process every frame of `source`, then finalize the last test.
    pub fn run(&mut self, source: &mut impl FrameSource) -> Result<SessionSummary> {
        while let Some(frame) = source.next_frame()? {
            if self.session_ended(frame.frame) {
                self.summary.stopped_early = true;
                break;
            }
            self.process_frame(&frame)?;
            self.summary.frames_processed += 1;
            if frame.frame % 1000 == 0 {
                debug!(frame = frame.frame, "Processed to frame");
            }
        }
        self.finish()?;
        info!(
            frames = self.summary.frames_processed,
            tests = self.summary.tests_observed,
            stopped_early = self.summary.stopped_early,
            "Session processed"
        );
        Ok(self.summary.clone())
    }

    /// Finalize the running test if its results are still pending.
    pub fn finish(&mut self) -> Result<()> {
        self.finalize()
    }

    pub fn process_frame(&mut self, frame: &CaptureFrame) -> Result<()> {
        let decoded: Vec<DecodedQr> = frame
            .codes
            .iter()
            .filter_map(|code| {
                self.translator
                    .translate(&code.data, code.location(), frame.frame)
            })
            .collect();
        if decoded.is_empty() {
            self.no_qr_since.get_or_insert(frame.frame);
        } else {
            self.no_qr_since = None;
        }

        if let Err(err) = self.missing_qr.observe(frame.frame, &decoded) {
            self.report_termination(&err)?;
            return Err(err);
        }

        let mut new_mezzanine: Vec<MezzanineEvent> = Vec::new();
        let mut new_status = None;
        let mut new_pre_test = None;
        for code in decoded {
            match code {
                DecodedQr::Mezzanine(event) => {
                    let tail_start = self
                        .mezzanine
                        .len()
                        .saturating_sub(self.config.general.duplicated_qr_check_count);
                    let duplicate = self.mezzanine[tail_start..]
                        .iter_mut()
                        .rev()
                        .chain(new_mezzanine.iter_mut())
                        .find(|e| e.same_code(&event));
                    match duplicate {
                        Some(existing) => {
                            existing.record_detection(frame.frame, &event.location);
                            debug!(
                                frame_number = existing.frame_number,
                                last_capture_frame = existing.last_capture_frame,
                                "Mezzanine code seen again"
                            );
                        }
                        None => new_mezzanine.push(event),
                    }
                }
                DecodedQr::Status(status) => {
                    let repeated =
                        self.statuses.last().is_some_and(|s| s.payload == status.payload);
                    if !repeated {
                        new_status = Some(status);
                    }
                }
                DecodedQr::PreTest(pre_test) => {
                    let repeated =
                        self.pre_test.as_ref().is_some_and(|p| p.payload == pre_test.payload);
                    if !repeated {
                        new_pre_test = Some(pre_test);
                    }
                }
            }
        }

        // Codes recognized on the same frame arrive in scan order.
        new_mezzanine.sort_by_key(|e| e.frame_number);
        for event in &new_mezzanine {
            debug!(
                content_id = %event.content_id,
                media_time = event.media_time,
                frame_number = event.frame_number,
                capture_frame = event.first_capture_frame,
                "Mezzanine code detected"
            );
        }
        self.mezzanine.extend(new_mezzanine);

        if let Some(status) = new_status {
            self.process_status(status)?;
        }
        if let Some(pre_test) = new_pre_test {
            self.process_pre_test(pre_test)?;
        }
        Ok(())
    }

    fn process_status(&mut self, status: StatusEvent) -> Result<()> {
        debug!(
            status = %status.status,
            last_action = %status.last_action,
            current_time = status.current_time,
            delay = status.delay,
            capture_frame = status.capture_frame_num,
            "Status code detected"
        );
        let finished = status.is_finished();
        let capture_frame = status.capture_frame_num;
        self.statuses.push(status);
        if finished {
            self.last_finished_frame = Some(capture_frame);
            self.finalize()?;
        }
        Ok(())
    }

    fn process_pre_test(&mut self, pre_test: PreTestEvent) -> Result<()> {
        if let Some(previous) = &self.pre_test {
            if !previous.session_token.is_empty()
                && previous.session_token != pre_test.session_token
            {
                return Err(DpctfError::Terminate(format!(
                    "session_token does not match, recording should contain only one test session! previous session={}, current session={}",
                    previous.session_token, pre_test.session_token
                )));
            }
        }
        let new_test = self
            .pre_test
            .as_ref()
            .map_or(true, |p| p.test_id != pre_test.test_id);
        if !new_test {
            return Ok(());
        }

        self.finalize()?;
        self.last_finished_frame = None;
        let test_id = pre_test.test_id.clone();
        let start_frame = pre_test.capture_frame_num;
        self.pre_test = Some(pre_test);
        self.load_new_test(&test_id, start_frame)
    }

    fn load_new_test(&mut self, test_id: &str, start_frame: u64) -> Result<()> {
        self.mezzanine.clear();
        self.statuses.clear();
        self.active = None;

        let descriptor = self.parser.parse_tests_json(test_id)?;
        let handler = build_handler(&descriptor, &self.parser)?;
        info!(test_id, path = %descriptor.path, start_frame, "Start a new test");
        self.active = Some(ActiveTest {
            descriptor,
            handler,
            start_frame,
            observed: false,
        });
        Ok(())
    }

    fn session_token(&self) -> String {
        self.pre_test
            .as_ref()
            .map(|p| p.session_token.clone())
            .unwrap_or_default()
    }

    /// Run the observations of the active test once and post them.
    fn finalize(&mut self) -> Result<()> {
        let token = self.session_token();
        let Some(active) = self.active.as_mut().filter(|a| !a.observed) else {
            return Ok(());
        };
        active.observed = true;
        let path = active.descriptor.path.clone();
        let outcome = observe_test(
            active,
            &self.mezzanine,
            &self.statuses,
            self.audio.as_mut(),
            &self.config,
            self.camera,
        );
        match outcome {
            Ok(results) => {
                self.summary.tests_observed += 1;
                self.sink.post_result(&token, &path, &results)
            }
            Err(err) if err.is_fatal() => {
                self.sink
                    .post_result(&token, &path, &[termination_result(&err)])?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Post the abort reason against the running test.
    fn report_termination(&mut self, err: &DpctfError) -> Result<()> {
        let token = self.session_token();
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        active.observed = true;
        let path = active.descriptor.path.clone();
        warn!(test = %path, error = %err, "Observation terminated");
        self.sink
            .post_result(&token, &path, &[termination_result(err)])
    }

    fn session_ended(&self, capture_frame: u64) -> bool {
        let general = &self.config.general;
        let end_of_session = general.end_of_session_timeout;
        self.timed_out(self.last_finished_frame, capture_frame, end_of_session)
            || self.timed_out(self.no_qr_since, capture_frame, general.no_qr_code_timeout)
    }

    fn timed_out(&self, since: Option<u64>, capture_frame: u64, timeout: u32) -> bool {
        let Some(since) = since else {
            return false;
        };
        let elapsed = capture_frame.saturating_sub(since) as f64;
        let seconds = (elapsed / self.camera.frame_rate).round();
        if seconds > f64::from(timeout) {
            info!(
                seconds,
                timeout,
                capture_frame,
                "End of recorded session reached"
            );
            return true;
        }
        false
    }
}

fn termination_result(err: &DpctfError) -> ObservationResult {
    let message = match err {
        DpctfError::Terminate(msg) => msg.clone(),
        other => other.to_string(),
    };
    ObservationResult::new(TERMINATION_RESULT_NAME, ObservationStatus::Error, message)
}

/// Audio prepared for one test.
struct TestAudio<'a> {
    subject: &'a [i16],
    expected: MezzanineSegment,
    unexpected: Option<MezzanineSegment>,
    decoded: DecodedAudio,
    first_offset_ms: f64,
}

/// Cut the test's part of the recording and decode its watermark segments.
///
/// A failed alignment leaves the segment list empty. Missing watermark
/// files skip the test's audio; format and integrity errors are fatal.
fn prepare_audio<'a>(
    audio: &'a mut AudioInputs,
    data: &AudioSegmentData,
    params: &ParametersDict,
    test_start_time: f64,
    config: &ObservationConfig,
) -> Result<Option<TestAudio<'a>>> {
    let AudioInputs { recording, library } = audio;
    let recording: &'a Recording = recording;
    let sample_length = params.get_f64("audio_sample_length")? as u32;

    let segments = |library: &mut MezzanineLibrary| -> std::result::Result<_, AudioError> {
        let expected =
            library.segment(&data.content_id, data.expected.start, data.expected.end)?;
        let unexpected = data
            .unexpected
            .as_ref()
            .map(|r| library.segment(&data.content_id, r.start, r.end))
            .transpose()?;
        Ok((expected, unexpected))
    };
    let (expected, unexpected) = match segments(library) {
        Ok(found) => found,
        Err(err) if err.is_fatal() => return Err(err.into()),
        Err(err) => {
            warn!(content_id = %data.content_id, error = %err, "Mezzanine audio unavailable");
            return Ok(None);
        }
    };

    let subject = recording.subject_from_ms(test_start_time);
    let decoded = match decode_segments(
        data.expected.start,
        std::slice::from_ref(&expected),
        subject,
        library.sample_rate(),
        sample_length,
        &config.audio,
    ) {
        Ok(decoded) => decoded,
        Err(AudioError::Alignment(msg)) => {
            warn!(content_id = %data.content_id, %msg, "Audio alignment failed");
            DecodedAudio::default()
        }
        Err(err) => return Err(err.into()),
    };
    info!(segments = decoded.segments.len(), "Audio segments decoded");
    let first_offset_ms = decoded.first_offset_ms(library.sample_rate());
    Ok(Some(TestAudio {
        subject,
        expected,
        unexpected,
        decoded,
        first_offset_ms,
    }))
}

fn observe_test(
    test: &ActiveTest,
    mezzanine: &[MezzanineEvent],
    statuses: &[StatusEvent],
    audio: Option<&mut AudioInputs>,
    config: &ObservationConfig,
    camera: CameraTiming,
) -> Result<Vec<ObservationResult>> {
    let handler = test.handler.as_ref();
    info!(
        test = %test.descriptor.path,
        mezzanine = mezzanine.len(),
        statuses = statuses.len(),
        "Making observations"
    );
    let test_start_time = camera.frame_to_ms(test.start_frame);
    let prepared = match (audio, handler.audio_segment_data()?) {
        (Some(audio), Some(data)) => {
            prepare_audio(audio, &data, handler.parameters(), test_start_time, config)?
        }
        _ => None,
    };

    let audio_segments: &[AudioSegment] = prepared
        .as_ref()
        .map(|audio| audio.decoded.segments.as_slice())
        .unwrap_or_default();
    let evidence = prepared.as_ref().map(|audio| AudioEvidence {
        subject: audio.subject,
        expected: &audio.expected,
        unexpected: audio.unexpected.as_ref(),
        first_offset_ms: audio.first_offset_ms,
        test_start_time,
    });
    let input = ObservationInput {
        mezzanine,
        statuses,
        audio_segments,
        audio: evidence,
        camera,
    };
    handler.make_observations(&input, config)
}
