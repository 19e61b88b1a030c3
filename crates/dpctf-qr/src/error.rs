//! Error types for QR payload translation.

use dpctf_core::error::DpctfError;

/// Errors from translating a QR payload into an event.
#[derive(Debug, thiserror::Error)]
pub enum QrError {
    #[error("Invalid media time: {0}")]
    InvalidMediaTime(String),
    #[error("Invalid frame rate: {0}")]
    InvalidFrameRate(String),
    #[error("Invalid frame number: {0}")]
    InvalidFrameNumber(String),
}

impl From<QrError> for DpctfError {
    fn from(err: QrError) -> Self {
        DpctfError::Qr(err.to_string())
    }
}
