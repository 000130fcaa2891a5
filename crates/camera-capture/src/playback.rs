//! Playback of an ordered list of stored frames
//!
//! The list is replayed verbatim: ordering and filtering are the caller's
//! job. Once the list is exhausted every further pull reports
//! [`FrameEvent::EndOfStream`].

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::{CameraError, FrameEvent, FrameSource, VideoFrame};

/// Turns a stored frame location into a [`VideoFrame`]
pub trait FrameDecoder {
    fn decode(&mut self, path: &Path, sequence: u32) -> Result<VideoFrame, CameraError>;
}

/// Decodes image files (PNG, JPEG, ...) to RGB8 with the `image` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageDecoder;

impl FrameDecoder for ImageDecoder {
    fn decode(&mut self, path: &Path, sequence: u32) -> Result<VideoFrame, CameraError> {
        let img = image::open(path).map_err(|e| CameraError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let timestamp_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        Ok(VideoFrame::from_rgb_image(img.to_rgb8(), timestamp_ns, sequence))
    }
}

/// Replays stored frames in list order
pub struct SequencePlayback<D: FrameDecoder = ImageDecoder> {
    frames: Vec<PathBuf>,
    cursor: usize,
    decoder: D,
    released: bool,
    end_reported: bool,
}

impl SequencePlayback<ImageDecoder> {
    /// Open playback over `frames`, already sorted into playback order
    pub fn open(frames: Vec<PathBuf>) -> Self {
        Self::with_decoder(frames, ImageDecoder)
    }
}

impl<D: FrameDecoder> SequencePlayback<D> {
    /// Open playback with a custom decoder
    pub fn with_decoder(frames: Vec<PathBuf>, decoder: D) -> Self {
        info!("Sequence playback opened with {} stored frames", frames.len());
        Self {
            frames,
            cursor: 0,
            decoder,
            released: false,
            end_reported: false,
        }
    }

    /// Number of frames in the list
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames not yet handed out
    pub fn remaining(&self) -> usize {
        if self.released {
            return 0;
        }
        self.frames.len() - self.cursor
    }
}

impl<D: FrameDecoder> FrameSource for SequencePlayback<D> {
    fn next_frame(&mut self) -> Result<FrameEvent, CameraError> {
        if self.released || self.cursor >= self.frames.len() {
            if !self.end_reported {
                info!("Sequence playback exhausted after {} frames", self.cursor);
                self.end_reported = true;
            }
            return Ok(FrameEvent::EndOfStream);
        }

        let sequence = self.cursor as u32;
        let path = &self.frames[self.cursor];
        // Advance before decoding so a bad file is skipped on retry.
        self.cursor += 1;

        debug!("Decoding stored frame {} from {}", sequence, path.display());
        let frame = self.decoder.decode(path, sequence)?;
        Ok(FrameEvent::Frame(frame))
    }

    fn is_ready(&self) -> bool {
        !self.released
    }

    fn release(&mut self) {
        if !self.released {
            debug!(
                "Releasing playback cursor at {}/{} ({} frames unplayed)",
                self.cursor,
                self.len(),
                self.remaining()
            );
            self.released = true;
        }
    }

    fn describe(&self) -> String {
        format!("playback of {} stored frames", self.len())
    }
}
