//! Lane tracker entry point
//!
//! Replays stored frames when `frames_dir` is configured, otherwise streams
//! from the live road camera.

use std::process::ExitCode;

use adas::LaneDetector;
use anyhow::Context;
use camera_capture::{CameraError, FrameSource, SequencePlayback};
use camera_geometry::CameraModel;
use perception::{
    init_logging, list_frames, ExitStatus, LogFormat, PerceptionStateMachine, PipelineConfig, TerminationGuard,
    GUARD_FAILURE_EXIT_CODE,
};
use tracing::{error, info, warn};

fn main() -> ExitCode {
    if let Err(e) = init_logging(LogFormat::from_env()) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    info!("=== Lane Tracker v{} ===", env!("CARGO_PKG_VERSION"));

    // Before any device is opened
    let guard = match TerminationGuard::install() {
        Ok(guard) => guard,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(GUARD_FAILURE_EXIT_CODE);
        }
    };

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return ExitStatus::InitFailure.into();
        }
    };

    info!("******************************");
    info!(" Press Ctrl+C to terminate.");
    info!("******************************");

    let camera = CameraModel::load(&config.camera_name, &config.calibration_lookup(), config.fov_policy());
    let source = open_source(&config);
    let detector = LaneDetector::new(config.adas.clone());

    let machine = PerceptionStateMachine::new(source, camera, detector, config.recovery_policy());
    machine.run(&guard).status.into()
}

fn load_config() -> anyhow::Result<PipelineConfig> {
    let config = PipelineConfig::load().context("loading pipeline configuration")?;
    info!(
        "Configuration: camera={} source={} retry_budget={}",
        config.camera_name,
        config
            .frames_dir
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| config.device.clone()),
        config.retry_budget
    );
    Ok(config)
}

fn open_source(config: &PipelineConfig) -> Result<Box<dyn FrameSource>, CameraError> {
    match &config.frames_dir {
        Some(dir) => {
            let frames = list_frames(dir, &config.frame_extensions)
                .map_err(|e| CameraError::Open(format!("{}: {}", dir.display(), e)))?;
            let playback = SequencePlayback::open(frames);
            if playback.is_empty() {
                warn!("No stored frames in {}", dir.display());
            }
            Ok(Box::new(playback))
        }
        None => open_live(config),
    }
}

#[cfg(feature = "v4l2")]
fn open_live(config: &PipelineConfig) -> Result<Box<dyn FrameSource>, CameraError> {
    use camera_capture::{LiveCapture, V4l2Device};

    let capture = config.capture_config();
    let timeout = capture.timeout;
    Ok(Box::new(LiveCapture::open(V4l2Device::new(capture), timeout)?))
}

#[cfg(not(feature = "v4l2"))]
fn open_live(config: &PipelineConfig) -> Result<Box<dyn FrameSource>, CameraError> {
    Err(CameraError::Unsupported(format!(
        "{} (built without the v4l2 feature)",
        config.device
    )))
}
