//! Error types for audio watermark processing.

use dpctf_core::error::DpctfError;

/// Errors from reading, trimming or decoding watermark audio.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    /// The recording could not be lined up with the mezzanine watermark.
    #[error("Audio alignment failed: {0}")]
    Alignment(String),
    /// Sample rate or bit depth not supported.
    #[error("Unsupported audio format: {0}")]
    Format(String),
    /// Mezzanine file failed its manifest digest check.
    #[error("Mezzanine integrity check failed: {0}")]
    Integrity(String),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AudioError {
    /// Format and integrity problems invalidate every audio observation of the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AudioError::Format(_) | AudioError::Integrity(_))
    }
}

impl From<AudioError> for DpctfError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::Alignment(msg) => DpctfError::Alignment(msg),
            AudioError::Io(e) => DpctfError::Io(e),
            e if e.is_fatal() => DpctfError::Terminate(e.to_string()),
            e => DpctfError::Audio(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_error_display() {
        let err = AudioError::Alignment("no consensus".to_string());
        assert_eq!(err.to_string(), "Audio alignment failed: no consensus");

        let err = AudioError::Format("44100 Hz".to_string());
        assert_eq!(err.to_string(), "Unsupported audio format: 44100 Hz");
    }

    #[test]
    fn test_alignment_maps_to_core_alignment() {
        let err: DpctfError = AudioError::Alignment("x".into()).into();
        assert!(matches!(err, DpctfError::Alignment(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_format_and_integrity_are_fatal() {
        let err: DpctfError = AudioError::Format("8 bit".into()).into();
        assert!(err.is_fatal());
        let err: DpctfError = AudioError::Integrity("PN01".into()).into();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.wav");
        let err: AudioError = io_err.into();
        assert!(matches!(err, AudioError::Io(_)));
        let core: DpctfError = err.into();
        assert!(matches!(core, DpctfError::Io(_)));
    }
}
