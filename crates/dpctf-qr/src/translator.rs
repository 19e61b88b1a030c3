use regex::Regex;
use serde_json::Value;
use tracing::debug;

use dpctf_core::types::{Location, MezzanineEvent, PreTestEvent, StatusEvent};

use crate::error::QrError;
use crate::frame_rate::parse_frame_rate;

/// A payload classified into one of the event kinds the framework consumes.
#[derive(Debug, Clone)]
pub enum DecodedQr {
    Mezzanine(MezzanineEvent),
    Status(StatusEvent),
    PreTest(PreTestEvent),
}

impl DecodedQr {
    /// Raw payload string, used for deduplication.
    pub fn payload(&self) -> &str {
        match self {
            DecodedQr::Mezzanine(e) => &e.payload,
            DecodedQr::Status(e) => &e.payload,
            DecodedQr::PreTest(e) => &e.payload,
        }
    }
}

/// Translates recognized QR payload strings into timeline events.
///
/// The mezzanine grammar takes priority over every JSON form.
pub struct QrTranslator {
    mezzanine_re: Regex,
}

impl Default for QrTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl QrTranslator {
    pub fn new() -> Self {
        Self {
            mezzanine_re: Regex::new(
                r"^(.+);(\d{2}:[0-6][0-9]:[0-6][0-9]\.\d{3});(\d{7});([0-9.]+)$",
            )
            .expect("Invalid mezzanine regex"),
        }
    }

    /// Translate one payload detected on `capture_frame`.
    ///
    /// Returns `None` for payloads that match none of the known forms.
    pub fn translate(
        &self,
        data: &str,
        location: Location,
        capture_frame: u64,
    ) -> Option<DecodedQr> {
        if let Some(caps) = self.mezzanine_re.captures(data) {
            return match Self::mezzanine(data, &caps, location, capture_frame) {
                Ok(event) => Some(DecodedQr::Mezzanine(event)),
                Err(e) => {
                    debug!(payload = data, error = %e, "Ignoring malformed mezzanine QR code");
                    None
                }
            };
        }

        let json: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                debug!(payload = data, error = %e, "Unrecognised QR code");
                return None;
            }
        };

        if let Some(status) = Self::status(data, &json, capture_frame) {
            return Some(DecodedQr::Status(status));
        }
        if let Some(pre_test) = Self::pre_test(data, &json, capture_frame) {
            return Some(DecodedQr::PreTest(pre_test));
        }

        debug!(payload = data, "Unrecognised QR code JSON");
        None
    }

    fn mezzanine(
        data: &str,
        caps: &regex::Captures<'_>,
        location: Location,
        capture_frame: u64,
    ) -> Result<MezzanineEvent, QrError> {
        let media_time = media_time_to_ms(&caps[2])?;
        let frame_number: u32 = caps[3]
            .parse()
            .map_err(|_| QrError::InvalidFrameNumber(caps[3].to_string()))?;
        let frame_rate = parse_frame_rate(&caps[4])?;

        Ok(MezzanineEvent::new(
            data,
            &caps[1],
            media_time,
            frame_number,
            frame_rate,
            capture_frame,
            location,
        ))
    }

    /// Status forms in priority order: `{s,a,ct,d}`, `{s,a,d}`, `{s,a}`.
    fn status(data: &str, json: &Value, capture_frame: u64) -> Option<StatusEvent> {
        let status = json.get("s")?.as_str()?;
        let last_action = json.get("a")?.as_str()?;

        let delay = json.get("d").and_then(as_i64);
        let current_time = delay.and(json.get("ct").and_then(as_f64));

        Some(StatusEvent {
            payload: data.to_string(),
            status: status.to_string(),
            last_action: last_action.to_string(),
            current_time: current_time.unwrap_or(0.0),
            delay: delay.unwrap_or(0),
            capture_frame_num: capture_frame,
        })
    }

    fn pre_test(data: &str, json: &Value, capture_frame: u64) -> Option<PreTestEvent> {
        let session_token = json.get("session_token")?.as_str()?;
        let test_id = json.get("test_id")?.as_str()?;
        Some(PreTestEvent {
            payload: data.to_string(),
            session_token: session_token.to_string(),
            test_id: test_id.to_string(),
            capture_frame_num: capture_frame,
        })
    }
}

/// `HH:MM:SS.mmm` to milliseconds.
pub fn media_time_to_ms(text: &str) -> Result<f64, QrError> {
    let invalid = || QrError::InvalidMediaTime(text.to_string());
    let (hms, millis) = text.split_once('.').ok_or_else(invalid)?;
    let mut parts = hms.split(':');
    let mut next = || -> Result<u64, QrError> {
        parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())
    };
    let (h, m, s) = (next()?, next()?, next()?);
    let ms: u64 = millis.parse().map_err(|_| invalid())?;
    if m > 59 || s > 59 {
        return Err(invalid());
    }
    Ok((h * 3_600_000 + m * 60_000 + s * 1000 + ms) as f64)
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
