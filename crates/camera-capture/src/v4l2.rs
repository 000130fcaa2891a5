//! V4L2 road camera device (feature `v4l2`)

use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{info, warn};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;

use crate::{CameraError, CaptureConfig, CaptureDevice, VideoFrame};

const BUFFER_COUNT: u32 = 4;

/// A V4L2 capture device delivering RGB24 frames through MMAP buffers
pub struct V4l2Device {
    config: CaptureConfig,
    // Declared before `device`: the stream is torn down first.
    stream: Option<MmapStream<'static>>,
    device: Option<v4l::Device>,
    active_width: u32,
    active_height: u32,
}

impl V4l2Device {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            stream: None,
            device: None,
        }
    }
}

impl CaptureDevice for V4l2Device {
    fn name(&self) -> &str {
        &self.config.device
    }

    fn start(&mut self) -> Result<(), CameraError> {
        let device = v4l::Device::with_path(&self.config.device)
            .map_err(|e| CameraError::Open(format!("{}: {}", self.config.device, e)))?;

        let mut format = device
            .format()
            .map_err(|e| CameraError::Format(e.to_string()))?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = device
            .set_format(&format)
            .map_err(|e| CameraError::Format(e.to_string()))?;
        if format.fourcc != v4l::FourCC::new(b"RGB3") {
            return Err(CameraError::Format(format!(
                "{} does not deliver RGB3 (got {})",
                self.config.device, format.fourcc
            )));
        }

        if self.config.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.fps);
            if let Err(e) = device.set_params(&params) {
                warn!("Failed to set fps on {}: {}", self.config.device, e);
            }
        }

        let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| CameraError::Stream(e.to_string()))?;
        stream.set_timeout(self.config.timeout);

        self.active_width = format.width;
        self.active_height = format.height;
        self.stream = Some(stream);
        self.device = Some(device);

        info!(
            "V4L2 device {} streaming {}x{}",
            self.config.device, self.active_width, self.active_height
        );
        Ok(())
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<VideoFrame, CameraError> {
        let stream = self.stream.as_mut().ok_or(CameraError::NotInitialized)?;
        if timeout != self.config.timeout {
            stream.set_timeout(timeout);
            self.config.timeout = timeout;
        }

        let (buf, _meta) = stream.next().map_err(|e| match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => CameraError::Timeout(timeout),
            _ => CameraError::Stream(e.to_string()),
        })?;

        let timestamp_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        let expected = (self.active_width * self.active_height * 3) as usize;
        if buf.len() < expected {
            return Err(CameraError::Stream(format!(
                "short buffer: {} bytes, expected {}",
                buf.len(),
                expected
            )));
        }

        Ok(VideoFrame::new(
            buf[..expected].to_vec(),
            self.active_width,
            self.active_height,
            timestamp_ns,
            0,
        ))
    }

    fn stop(&mut self) {
        self.stream = None;
        self.device = None;
    }

    fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }
}
