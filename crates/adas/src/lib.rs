//! Advanced Driver Assistance System (ADAS)
//!
//! Road scene analysis for the lane tracker:
//! - Lane marking detection
//! - Vehicle position in lane and departure warning
//! - Vanishing point in image-center coordinates

pub mod config;
pub mod lane;

pub use config::AdasConfig;
pub use lane::{LaneDetector, LanePosition, LaneState};

use camera_capture::VideoFrame;
use camera_geometry::CameraModel;
use thiserror::Error;

/// ADAS error types
#[derive(Error, Debug)]
pub enum AdasError {
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

/// Lane detection as seen by the perception loop.
///
/// Gets one frame plus the camera it came from and returns the lane
/// geometry, or fails for this frame only.
pub trait LaneDetect {
    fn detect(&mut self, frame: &VideoFrame, camera: &CameraModel) -> Result<LaneState, AdasError>;
}

impl<F> LaneDetect for F
where
    F: FnMut(&VideoFrame, &CameraModel) -> Result<LaneState, AdasError>,
{
    fn detect(&mut self, frame: &VideoFrame, camera: &CameraModel) -> Result<LaneState, AdasError> {
        self(frame, camera)
    }
}
