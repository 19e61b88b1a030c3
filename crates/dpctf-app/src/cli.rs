//! CLI argument definitions for the observation binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

use dpctf_core::ObservationConfig;

/// Camera frame rate assumed when neither the flag nor the env var sets one.
pub const DEFAULT_CAMERA_FPS: f64 = 240.0;

/// Observe a recorded DPCTF test session and write per-test results.
#[derive(Parser, Debug)]
#[command(name = "dpctf", version, about)]
pub struct CliArgs {
    /// QR detections of the recording, one JSON object per camera frame.
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,

    /// Audio track of the recording (WAV).
    #[arg(short = 'a', long = "audio")]
    pub audio: Option<PathBuf>,

    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Directory holding tests.json and test-config.json.
    #[arg(long = "configuration-dir")]
    pub configuration_dir: Option<PathBuf>,

    /// Directory holding the audio mezzanine WAV files.
    #[arg(long = "mezzanine-dir")]
    pub mezzanine_dir: Option<PathBuf>,

    /// Directory results are written under, one folder per session.
    #[arg(short = 'r', long = "result-dir")]
    pub result_dir: Option<PathBuf>,

    /// Frame rate of the camera recording.
    #[arg(long = "camera-fps")]
    pub camera_fps: Option<f64>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Write each test's results to its own debug file.
    #[arg(long = "debug")]
    pub debug: bool,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > DPCTF_CONFIG env var > ./config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("DPCTF_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("config.toml")
    }

    /// Resolve the camera frame rate.
    ///
    /// Priority: --camera-fps flag > DPCTF_CAMERA_FPS env var > 240.
    pub fn resolve_camera_fps(&self) -> f64 {
        if let Some(fps) = self.camera_fps.filter(|fps| *fps > 0.0) {
            return fps;
        }
        if let Ok(val) = std::env::var("DPCTF_CAMERA_FPS") {
            if let Ok(fps) = val.parse::<f64>() {
                if fps > 0.0 {
                    return fps;
                }
            }
        }
        DEFAULT_CAMERA_FPS
    }

    /// Resolve the log level.
    ///
    /// Returns `None` if not overridden; `RUST_LOG` applies then.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }

    /// Apply directory and debug flags on top of the loaded config.
    pub fn apply_overrides(&self, config: &mut ObservationConfig) {
        let path = |p: &PathBuf| p.to_string_lossy().to_string();
        if let Some(ref dir) = self.configuration_dir {
            config.general.configuration_dir = path(dir);
        }
        if let Some(ref dir) = self.result_dir {
            config.general.result_dir = path(dir);
        }
        if let Some(ref dir) = self.mezzanine_dir {
            config.audio.mezzanine_dir = path(dir);
        }
        if self.debug {
            config.general.debug = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        let mut argv = vec!["dpctf"];
        argv.extend_from_slice(args);
        CliArgs::try_parse_from(argv).unwrap()
    }

    // =====================================================================
    // Parsing
    // =====================================================================

    #[test]
    fn test_input_is_required() {
        assert!(CliArgs::try_parse_from(["dpctf"]).is_err());
    }

    #[test]
    fn test_parse_all_flags() {
        let args = parse(&[
            "-i",
            "session.jsonl",
            "--audio",
            "session.wav",
            "--camera-fps",
            "119.88",
            "--log-level",
            "debug",
            "--debug",
        ]);
        assert_eq!(args.input, PathBuf::from("session.jsonl"));
        assert_eq!(args.audio, Some(PathBuf::from("session.wav")));
        assert_eq!(args.resolve_camera_fps(), 119.88);
        assert_eq!(args.resolve_log_level().as_deref(), Some("debug"));
        assert!(args.debug);
    }

    // =====================================================================
    // Resolution
    // =====================================================================

    #[test]
    fn test_config_flag_wins() {
        let args = parse(&["-i", "x.jsonl", "--config", "/etc/dpctf.toml"]);
        assert_eq!(args.resolve_config_path(), PathBuf::from("/etc/dpctf.toml"));
    }

    #[test]
    fn test_overrides_replace_config_values() {
        let args = parse(&[
            "-i",
            "x.jsonl",
            "--configuration-dir",
            "runner",
            "--result-dir",
            "out",
            "--mezzanine-dir",
            "pn",
            "--debug",
        ]);
        let mut config = ObservationConfig::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.general.configuration_dir, "runner");
        assert_eq!(config.general.result_dir, "out");
        assert_eq!(config.audio.mezzanine_dir, "pn");
        assert!(config.general.debug);
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let args = parse(&["-i", "x.jsonl"]);
        let mut config = ObservationConfig::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.general.result_dir, "results");
        assert_eq!(config.audio.mezzanine_dir, "audio_mezzanine");
        assert!(!config.general.debug);
    }
}
