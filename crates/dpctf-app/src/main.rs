//! DPCTF observation binary - composition root.
//!
//! 1. Load configuration from TOML and apply CLI overrides
//! 2. Load the test runner's tests.json and test-config.json
//! 3. Open the detections file and, when given, the session audio
//! 4. Run the frame-stream processor on a blocking thread until the
//!    recording ends or the process is interrupted

mod cli;

use std::path::Path;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dpctf_audio::{MezzanineLibrary, Recording};
use dpctf_core::ObservationConfig;
use dpctf_observation::ConfigurationParser;
use dpctf_session::{AudioInputs, FileResultSink, FrameStreamProcessor, JsonLinesSource};

use cli::CliArgs;

/// Open the session recording and the mezzanine library it is matched against.
fn load_audio(
    path: &Path,
    config: &ObservationConfig,
) -> Result<AudioInputs, Box<dyn std::error::Error>> {
    let recording = Recording::open(path, &config.audio)?;
    let library = MezzanineLibrary::new(config.audio.mezzanine_dir.clone(), &config.audio);
    Ok(AudioInputs { recording, library })
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let filter = match args.resolve_log_level() {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting DPCTF observation v{}", env!("CARGO_PKG_VERSION"));

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = ObservationConfig::load_or_default(&config_file);
    args.apply_overrides(&mut config);
    info!(path = %config_file.display(), "Configuration loaded");

    let parser = ConfigurationParser::load(Path::new(&config.general.configuration_dir))?;
    let camera_fps = args.resolve_camera_fps();
    let audio = match args.audio.as_deref() {
        Some(path) => Some(load_audio(path, &config)?),
        None => None,
    };
    let sink = FileResultSink::new(config.general.result_dir.clone(), &config)?;
    let mut source = JsonLinesSource::open(&args.input)?;
    info!(camera_fps, audio = audio.is_some(), "Observation starting");

    let mut processor = FrameStreamProcessor::new(config, parser, camera_fps, sink);
    if let Some(audio) = audio {
        processor = processor.with_audio(audio);
    }

    let observation = tokio::task::spawn_blocking(move || processor.run(&mut source));
    tokio::select! {
        joined = observation => match joined? {
            Ok(summary) => {
                info!(
                    frames = summary.frames_processed,
                    tests = summary.tests_observed,
                    stopped_early = summary.stopped_early,
                    "Observation complete"
                );
                Ok(())
            }
            Err(e) => {
                error!(error = %e, fatal = e.is_fatal(), "Observation stopped");
                Err(e.into())
            }
        },
        () = interrupted() => {
            warn!("Interrupted, remaining tests are not observed");
            Err("interrupted".into())
        }
    }
}
