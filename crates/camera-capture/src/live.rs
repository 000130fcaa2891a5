//! Live capture from a physical camera

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{CameraError, FrameEvent, FrameSource, VideoFrame};

/// A camera device that streams frames.
///
/// Drivers implement this; [`LiveCapture`] adds the start/stop lifecycle and
/// the [`FrameSource`] contract on top.
pub trait CaptureDevice {
    /// Device path or identifier
    fn name(&self) -> &str;

    /// Start streaming
    fn start(&mut self) -> Result<(), CameraError>;

    /// Read next frame, blocking for at most `timeout`
    fn read_frame(&mut self, timeout: Duration) -> Result<VideoFrame, CameraError>;

    /// Stop streaming and close the device
    fn stop(&mut self);

    /// Check if streaming
    fn is_streaming(&self) -> bool;
}

/// Live camera frame source.
///
/// Streaming starts in [`LiveCapture::open`] and stops on
/// [`FrameSource::release`] or drop, whichever comes first.
pub struct LiveCapture<D: CaptureDevice> {
    device: D,
    timeout: Duration,
    sequence: u32,
    released: bool,
}

impl<D: CaptureDevice> LiveCapture<D> {
    /// Start streaming from `device`
    pub fn open(mut device: D, timeout: Duration) -> Result<Self, CameraError> {
        device.start()?;
        info!("Live capture streaming from {} (timeout {:?})", device.name(), timeout);
        Ok(Self {
            device,
            timeout,
            sequence: 0,
            released: false,
        })
    }

    /// Frames delivered so far
    pub fn frames_captured(&self) -> u32 {
        self.sequence
    }
}

impl<D: CaptureDevice> FrameSource for LiveCapture<D> {
    fn next_frame(&mut self) -> Result<FrameEvent, CameraError> {
        if self.released {
            return Err(CameraError::NotInitialized);
        }

        let mut frame = self.device.read_frame(self.timeout).map_err(|e| {
            warn!("Read from {} failed: {}", self.device.name(), e);
            e
        })?;
        frame.sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(FrameEvent::Frame(frame))
    }

    fn is_ready(&self) -> bool {
        !self.released && self.device.is_streaming()
    }

    fn release(&mut self) {
        if !self.released {
            debug!("Stopping live capture on {}", self.device.name());
            self.device.stop();
            self.released = true;
        }
    }

    fn describe(&self) -> String {
        format!("live capture from {}", self.device.name())
    }
}

impl<D: CaptureDevice> Drop for LiveCapture<D> {
    fn drop(&mut self) {
        self.release();
    }
}
