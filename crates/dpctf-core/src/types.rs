use num_rational::Ratio;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Exact frame rate of a mezzanine stream, e.g. `30000/1001`.
pub type FrameRate = Ratio<i64>;

/// Duration of one frame in milliseconds.
pub fn frame_duration_ms(rate: &FrameRate) -> f64 {
    1000.0 / rate_as_f64(rate)
}

/// Frame rate as a float, for tolerance arithmetic that is not accumulated.
pub fn rate_as_f64(rate: &FrameRate) -> f64 {
    rate.to_f64().unwrap_or(0.0)
}

/// `floor(ms / 1000 * rate)` evaluated exactly on the rational rate.
///
/// Frame-boundary positions are derived from long accumulated durations, so
/// the multiplication stays in rational arithmetic until the final floor.
pub fn frame_at_ms(ms: f64, rate: &FrameRate) -> i64 {
    let scaled = (ms * 1000.0).round() as i64;
    let frames = Ratio::new(scaled, 1_000_000) * *rate;
    frames.floor().to_integer()
}

// =============================================================================
// QR-derived events
// =============================================================================

/// Bounding box of a detected QR code, in capture pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Location {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Component-wise sum, used to accumulate repeated detections.
    pub fn add(&self, other: &Location) -> Location {
        Location {
            left: self.left + other.left,
            top: self.top + other.top,
            width: self.width + other.width,
            height: self.height + other.height,
        }
    }

    /// Component-wise division, rounded to two decimals.
    pub fn divided_by(&self, count: u32) -> Location {
        let n = f64::from(count.max(1));
        let round2 = |v: f64| (v / n * 100.0).round() / 100.0;
        Location {
            left: round2(self.left),
            top: round2(self.top),
            width: round2(self.width),
            height: round2(self.height),
        }
    }
}

/// One decoded mezzanine (video content) QR code.
///
/// Repeated detections of the same payload on later capture frames are
/// merged into a single event via [`MezzanineEvent::record_detection`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MezzanineEvent {
    /// Raw QR payload; two events are the same code when payloads match.
    pub payload: String,
    pub content_id: String,
    /// Position on the media timeline in milliseconds.
    pub media_time: f64,
    pub frame_number: u32,
    pub frame_rate: FrameRate,
    pub first_capture_frame: u64,
    pub last_capture_frame: u64,
    /// Sum of all detected bounding boxes.
    pub location: Location,
    pub detection_count: u32,
}

impl MezzanineEvent {
    pub fn new(
        payload: impl Into<String>,
        content_id: impl Into<String>,
        media_time: f64,
        frame_number: u32,
        frame_rate: FrameRate,
        capture_frame: u64,
        location: Location,
    ) -> Self {
        Self {
            payload: payload.into(),
            content_id: content_id.into(),
            media_time,
            frame_number,
            frame_rate,
            first_capture_frame: capture_frame,
            last_capture_frame: capture_frame,
            location,
            detection_count: 1,
        }
    }

    /// Merge a repeated detection of this code into the event.
    pub fn record_detection(&mut self, capture_frame: u64, location: &Location) {
        self.last_capture_frame = capture_frame;
        self.location = self.location.add(location);
        self.detection_count += 1;
    }

    /// Bounding box averaged over every detection.
    pub fn average_location(&self) -> Location {
        self.location.divided_by(self.detection_count)
    }

    pub fn same_code(&self, other: &MezzanineEvent) -> bool {
        self.payload == other.payload
    }
}

/// One decoded test-runner status QR code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub payload: String,
    /// Player state, e.g. `playing`, `waiting`, `appended`, `finished`.
    pub status: String,
    /// Last action taken by the test runner, e.g. `play`.
    pub last_action: String,
    /// Media element currentTime in seconds.
    pub current_time: f64,
    /// Milliseconds the test runner spent generating the previous code.
    pub delay: i64,
    pub capture_frame_num: u64,
}

impl StatusEvent {
    pub fn is_playing(&self) -> bool {
        self.status == "playing"
    }

    pub fn is_finished(&self) -> bool {
        self.status == "finished"
    }
}

/// Marker shown before each test starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreTestEvent {
    pub payload: String,
    pub session_token: String,
    pub test_id: String,
    pub capture_frame_num: u64,
}

/// One audio observation period located in the recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSegment {
    pub content_id: String,
    /// Expected position on the test timeline, in ms.
    pub media_time: f64,
    /// Detected position inside the test's subject recording, in ms.
    pub audio_segment_timing: f64,
    /// Nominal segment length, in ms.
    pub duration: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration_ntsc() {
        let rate = FrameRate::new(30000, 1001);
        let ms = frame_duration_ms(&rate);
        assert!((ms - 33.3667).abs() < 1e-3);
    }

    #[test]
    fn test_frame_at_ms_exact_rational() {
        let rate = FrameRate::new(30000, 1001);
        // 1001 ms at 29.97 fps is exactly 30 frames.
        assert_eq!(frame_at_ms(1001.0, &rate), 30);
        assert_eq!(frame_at_ms(1000.9, &rate), 29);
        assert_eq!(frame_at_ms(10_000.0, &FrameRate::from_integer(30)), 300);
    }

    #[test]
    fn test_location_accumulate_and_average() {
        let a = Location::new(10.0, 20.0, 100.0, 100.0);
        let b = Location::new(12.0, 22.0, 102.0, 98.0);
        let sum = a.add(&b);
        assert_eq!(sum, Location::new(22.0, 42.0, 202.0, 198.0));
        assert_eq!(sum.divided_by(2), Location::new(11.0, 21.0, 101.0, 99.0));
    }

    #[test]
    fn test_record_detection_merges() {
        let rate = FrameRate::from_integer(30);
        let loc = Location::new(0.0, 0.0, 10.0, 10.0);
        let mut event = MezzanineEvent::new("p", "c", 0.0, 1, rate, 5, loc);
        event.record_detection(6, &Location::new(2.0, 2.0, 10.0, 10.0));

        assert_eq!(event.first_capture_frame, 5);
        assert_eq!(event.last_capture_frame, 6);
        assert_eq!(event.detection_count, 2);
        assert_eq!(event.average_location(), Location::new(1.0, 1.0, 10.0, 10.0));
    }

    #[test]
    fn test_status_helpers() {
        let status = StatusEvent {
            payload: String::new(),
            status: "playing".into(),
            last_action: "play".into(),
            current_time: 0.0,
            delay: 0,
            capture_frame_num: 0,
        };
        assert!(status.is_playing());
        assert!(!status.is_finished());
    }
}
