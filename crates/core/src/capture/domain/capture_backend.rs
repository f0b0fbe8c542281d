use crate::capture::domain::capture_error::{OpenError, ReadFailure};
use crate::capture::domain::source_descriptor::SourceDescriptor;
use crate::shared::frame::Frame;

/// Opens capture handles on video sources.
///
/// Implementations handle I/O details (demuxing, decoding, device access)
/// while the buffer works with the abstract [`CaptureHandle`] and [`Frame`]
/// types. A backend is kept for the lifetime of a buffer so that file
/// sources can be reopened.
pub trait CaptureBackend: Send + Sync {
    fn open(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn CaptureHandle>, OpenError>;
}

/// An open connection to a video source.
pub trait CaptureHandle: Send {
    /// Reads the next frame. May block for as long as the source does.
    fn read(&mut self) -> Result<Frame, ReadFailure>;

    /// Nominal frames per second, or a non-positive value when unknown.
    fn frame_rate(&self) -> f64;

    /// Releases the underlying resource. Reads after this fail with
    /// [`ReadFailure::Closed`].
    fn close(&mut self);
}
