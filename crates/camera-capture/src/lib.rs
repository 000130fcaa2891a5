//! Camera Capture Library for the Lane Tracker
//!
//! Provides the frame sources the perception loop pulls from:
//! - Live capture from a road camera device (V4L2 behind the `v4l2` feature)
//! - Playback of an ordered list of stored frames
//!
//! Both variants implement [`FrameSource`] and are driven from a single
//! control thread.

pub mod frame;
pub mod live;
pub mod playback;
pub mod source;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use frame::VideoFrame;
pub use live::{CaptureDevice, LiveCapture};
pub use playback::{FrameDecoder, ImageDecoder, SequencePlayback};
pub use source::{FrameEvent, FrameSource};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Device;

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    Open(String),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Streaming error: {0}")]
    Stream(String),

    #[error("Capture timeout after {0:?}")]
    Timeout(Duration),

    #[error("Camera not initialized")]
    NotInitialized,

    #[error("Failed to decode stored frame {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("Live capture unavailable: {0}")]
    Unsupported(String),
}

/// Live capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Device path (e.g., "/dev/video1")
    pub device: String,
    /// Capture width
    pub width: u32,
    /// Capture height
    pub height: u32,
    /// Target FPS
    pub fps: u32,
    /// Upper bound on a single blocking read
    pub timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::road()
    }
}

impl CaptureConfig {
    /// Create road camera config (forward-facing, 1080p @ 30fps)
    pub fn road() -> Self {
        Self {
            device: "/dev/video1".to_string(),
            width: 1920,
            height: 1080,
            fps: 30,
            timeout: Duration::from_millis(1000),
        }
    }
}
