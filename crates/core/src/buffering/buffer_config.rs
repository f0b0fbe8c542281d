use std::time::Duration;

use crate::shared::constants::{DEFAULT_FALLBACK_PAUSE, DEFAULT_PACING_FACTOR, DEFAULT_RETRY_PAUSE};

/// Timing knobs for a [`FrameBuffer`](super::frame_buffer::FrameBuffer)'s
/// worker.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferConfig {
    /// Fraction of a file's frame interval to wait after each read.
    pub pacing_factor: f64,
    /// Wait after each read from a live source, or from a file with an
    /// unknown frame rate.
    pub fallback_pause: Duration,
    /// Wait after a failed read.
    pub retry_pause: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            pacing_factor: DEFAULT_PACING_FACTOR,
            fallback_pause: DEFAULT_FALLBACK_PAUSE,
            retry_pause: DEFAULT_RETRY_PAUSE,
        }
    }
}
