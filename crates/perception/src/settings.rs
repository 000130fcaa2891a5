//! Pipeline configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `LANE_TRACKER_*` environment variables (`__` separates nested
//! keys, e.g. `LANE_TRACKER_ADAS__LANE_CONFIDENCE=0.8`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use adas::AdasConfig;
use camera_capture::CaptureConfig;
use camera_geometry::{CalibrationDir, FieldOfView, FovPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::RecoveryPolicy;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "LANE_TRACKER_CONFIG";

/// Configuration file used when [`CONFIG_PATH_ENV`] is unset
pub const DEFAULT_CONFIG_PATH: &str = "lane-tracker.toml";

const ENV_PREFIX: &str = "LANE_TRACKER";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Calibration file stem under `ConfigFiles/Camera/`
    pub camera_name: String,

    /// Root holding `ConfigFiles/`; the executable's directory when unset
    pub calibration_dir: Option<PathBuf>,

    /// Replay stored frames from this directory instead of a live device
    pub frames_dir: Option<PathBuf>,

    /// File extensions picked up from `frames_dir`
    pub frame_extensions: Vec<String>,

    /// Live capture device
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,

    /// Upper bound on a single live read
    pub capture_timeout_ms: u64,

    /// Consecutive failures tolerated before giving up
    pub retry_budget: u32,

    /// Pause between a failure and the next capture attempt
    pub retry_backoff_ms: u64,

    /// Explicit `[vertical, horizontal]` field of view in degrees
    pub fov_override: Option<[f32; 2]>,

    /// Derive the field of view from the intrinsic matrix
    pub derive_fov: bool,

    pub adas: AdasConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let capture = CaptureConfig::road();
        Self {
            camera_name: "road_front".to_string(),
            calibration_dir: None,
            frames_dir: None,
            frame_extensions: vec!["png".into(), "jpg".into(), "jpeg".into()],
            device: capture.device,
            width: capture.width,
            height: capture.height,
            fps: capture.fps,
            capture_timeout_ms: capture.timeout.as_millis() as u64,
            retry_budget: RecoveryPolicy::default().retry_budget,
            retry_backoff_ms: 0,
            fov_override: None,
            derive_fov: false,
            adas: AdasConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from the file named by [`CONFIG_PATH_ENV`] (or
    /// [`DEFAULT_CONFIG_PATH`]) plus the environment
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(Some(&path))
    }

    /// Load from an optional file plus the environment. A missing file is
    /// not an error.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: PipelineConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera_name.trim().is_empty() {
            return Err(ConfigError::Invalid("camera_name is empty".into()));
        }
        if self.capture_timeout_ms == 0 {
            return Err(ConfigError::Invalid("capture_timeout_ms must be positive".into()));
        }
        if self.width == 0 || self.height == 0 || self.fps == 0 {
            return Err(ConfigError::Invalid(format!(
                "capture mode {}x{}@{} is not usable",
                self.width, self.height, self.fps
            )));
        }
        if !(0.0..=1.0).contains(&self.adas.lane_confidence) {
            return Err(ConfigError::Invalid(format!(
                "adas.lane_confidence {} outside [0, 1]",
                self.adas.lane_confidence
            )));
        }
        if let Some([v, h]) = self.fov_override {
            if !(v > 0.0 && v < 180.0 && h > 0.0 && h < 180.0) {
                return Err(ConfigError::Invalid(format!("fov_override [{}, {}] outside (0, 180)", v, h)));
            }
        }
        Ok(())
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            device: self.device.clone(),
            width: self.width,
            height: self.height,
            fps: self.fps,
            timeout: Duration::from_millis(self.capture_timeout_ms),
        }
    }

    pub fn recovery_policy(&self) -> RecoveryPolicy {
        RecoveryPolicy {
            retry_budget: self.retry_budget,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    /// An explicit override wins over `derive_fov`
    pub fn fov_policy(&self) -> FovPolicy {
        match (self.fov_override, self.derive_fov) {
            (Some([v, h]), _) => FovPolicy::Fixed(FieldOfView::new(v, h)),
            (None, true) => FovPolicy::FromIntrinsic,
            (None, false) => FovPolicy::default(),
        }
    }

    pub fn calibration_lookup(&self) -> CalibrationDir {
        match &self.calibration_dir {
            Some(dir) => CalibrationDir::at(dir),
            None => CalibrationDir::beside_executable(),
        }
    }
}
