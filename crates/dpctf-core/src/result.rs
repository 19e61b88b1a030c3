use serde::{Deserialize, Serialize};

/// Outcome of a single observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObservationStatus {
    #[default]
    NotRun,
    Pass,
    Fail,
    /// Reported for framework-level failures such as an aborted run.
    Error,
}

impl std::fmt::Display for ObservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ObservationStatus::NotRun => "NOT_RUN",
            ObservationStatus::Pass => "PASS",
            ObservationStatus::Fail => "FAIL",
            ObservationStatus::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

/// Result record posted for one observation of one test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationResult {
    pub status: ObservationStatus,
    pub message: String,
    pub name: String,
}

impl ObservationResult {
    pub fn not_run(name: impl Into<String>) -> Self {
        Self {
            status: ObservationStatus::NotRun,
            message: String::new(),
            name: name.into(),
        }
    }

    pub fn new(
        name: impl Into<String>,
        status: ObservationStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            name: name.into(),
        }
    }

    pub fn is_pass(&self) -> bool {
        self.status == ObservationStatus::Pass
    }
}
