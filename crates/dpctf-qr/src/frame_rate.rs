use dpctf_core::types::FrameRate;

use crate::error::QrError;

/// Exact rates for the frame-rate strings printed on mezzanine content.
const FRAME_RATE_TABLE: &[(&str, i64, i64)] = &[
    ("12.5", 25, 2),
    ("14.985", 15000, 1001),
    ("15", 15, 1),
    ("23.976", 24000, 1001),
    ("24", 24, 1),
    ("25", 25, 1),
    ("29.97", 30000, 1001),
    ("30", 30, 1),
    ("47.952", 48000, 1001),
    ("48", 48, 1),
    ("50", 50, 1),
    ("59.94", 60000, 1001),
    ("60", 60, 1),
    ("100", 100, 1),
    ("119.88", 120000, 1001),
    ("120", 120, 1),
];

/// Convert a frame-rate string to an exact rational.
///
/// NTSC-style rates are looked up in a table; anything else falls back to a
/// rational approximation of the decimal value.
pub fn parse_frame_rate(text: &str) -> Result<FrameRate, QrError> {
    if let Some((_, num, den)) = FRAME_RATE_TABLE.iter().find(|(s, _, _)| *s == text) {
        return Ok(FrameRate::new(*num, *den));
    }

    let value: f64 = text
        .parse()
        .map_err(|_| QrError::InvalidFrameRate(text.to_string()))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(QrError::InvalidFrameRate(text.to_string()));
    }
    FrameRate::approximate_float(value).ok_or_else(|| QrError::InvalidFrameRate(text.to_string()))
}
