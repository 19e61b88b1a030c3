use thiserror::Error;

/// Top-level error type for the observation framework.
///
/// Subsystem crates define their own error types and implement
/// `From<SubsystemError> for DpctfError` so that the `?` operator works
/// across crate boundaries. `Terminate` is the only variant that aborts a
/// whole recording; everything else is scoped to one test or one input.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DpctfError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Observation terminated: {0}")]
    Terminate(String),

    #[error("Audio alignment error: {0}")]
    Alignment(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("QR decoding error: {0}")]
    Qr(String),

    #[error("Result handling error: {0}")]
    Result(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DpctfError {
    /// Whether this error must stop processing of the entire recording.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DpctfError::Terminate(_))
    }
}

impl From<toml::de::Error> for DpctfError {
    fn from(err: toml::de::Error) -> Self {
        DpctfError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for DpctfError {
    fn from(err: toml::ser::Error) -> Self {
        DpctfError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for DpctfError {
    fn from(err: serde_json::Error) -> Self {
        DpctfError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for observation framework operations.
pub type Result<T> = std::result::Result<T, DpctfError>;
