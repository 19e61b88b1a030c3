use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DpctfError, Result};

/// Top-level configuration for the observation framework.
///
/// Loaded from `config.toml` by default. Constructed once at startup and
/// passed by reference into every component; nothing reads it globally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservationConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub tolerances: ToleranceConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub video: VideoConfig,
}

impl ObservationConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ObservationConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| DpctfError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory for session result files.
    pub result_dir: String,
    /// Directory holding `tests.json` and `test-config.json`.
    pub configuration_dir: String,
    /// Write standalone debug result files instead of merging into the
    /// session result document.
    pub debug: bool,
    /// Missing frames per test beyond which the run is aborted. 0 disables.
    pub missing_frame_threshold: u32,
    /// Consecutive capture frames without a mezzanine code beyond which the
    /// run is aborted, in mezzanine frames. 0 disables.
    pub consecutive_no_qr_threshold: u32,
    /// Seconds of capture after the last test finished before stopping.
    pub end_of_session_timeout: u32,
    /// Seconds of capture without any QR code before stopping.
    pub no_qr_code_timeout: u32,
    /// How many tail entries to compare when deduplicating mezzanine codes.
    pub duplicated_qr_check_count: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            result_dir: "results".to_string(),
            configuration_dir: "configuration".to_string(),
            debug: false,
            missing_frame_threshold: 0,
            consecutive_no_qr_threshold: 0,
            end_of_session_timeout: 10,
            no_qr_code_timeout: 5,
            duplicated_qr_check_count: 3,
        }
    }
}

/// Frame-number tolerances used by the every-sample-rendered checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToleranceConfig {
    /// Frames allowed missing at the start of a presentation.
    pub start_frame_num_tolerance: u32,
    /// Frames allowed missing at the end of a presentation.
    pub end_frame_num_tolerance: u32,
    /// Frames allowed missing inside a presentation.
    pub mid_frame_num_tolerance: u32,
    /// Deviation allowed for the first frame after a splice point.
    pub splice_start_frame_num_tolerance: u32,
    /// Deviation allowed for the last frame before a splice point.
    pub splice_end_frame_num_tolerance: u32,
}

/// Audio watermark alignment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Candidate start positions tried before alignment gives up.
    pub alignment_check_count: usize,
    /// Width of the local search window around each segment, in ms.
    pub observation_neighborhood_ms: u32,
    /// Directory holding the PN mezzanine WAV files and manifests.
    pub mezzanine_dir: String,
    /// Sample rate required of both mezzanine and recording.
    pub required_sample_rate: u32,
    /// Bit depth required of both mezzanine and recording.
    pub required_bits_per_sample: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            alignment_check_count: 5,
            observation_neighborhood_ms: 1000,
            mezzanine_dir: "audio_mezzanine".to_string(),
            required_sample_rate: 48_000,
            required_bits_per_sample: 16,
        }
    }
}

/// Video observation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Mezzanine codes searched on each side of a switch for shift checks.
    pub max_search_frames_for_video_shift: usize,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            max_search_frames_for_video_shift: 16,
        }
    }
}
