//! The frame source contract shared by live capture and playback

use crate::{CameraError, VideoFrame};

/// Outcome of a successful pull from a [`FrameSource`]
#[derive(Debug)]
pub enum FrameEvent {
    /// The next frame in acquisition order
    Frame(VideoFrame),
    /// A finite source ran out of frames. Not an error.
    EndOfStream,
}

/// Where the next image comes from.
///
/// Implementations are driven from a single control thread and hold no
/// internal concurrency. An `Err` from [`FrameSource::next_frame`] is a
/// capture failure (device hiccup, unreadable file) and is distinct from
/// [`FrameEvent::EndOfStream`].
pub trait FrameSource {
    /// Pull the next frame
    fn next_frame(&mut self) -> Result<FrameEvent, CameraError>;

    /// Whether the source acquired its resources and can deliver frames
    fn is_ready(&self) -> bool;

    /// Release device handles and cursors. Must be idempotent.
    fn release(&mut self);

    /// Short human-readable description for logs
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<FrameEvent, CameraError> {
        (**self).next_frame()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
