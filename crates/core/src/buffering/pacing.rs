use std::time::Duration;

use crate::buffering::buffer_config::BufferConfig;
use crate::capture::domain::source_descriptor::SourceKind;

/// How long the worker waits after a successful read.
///
/// Files are paced at `pacing_factor / fps` so reads run a little ahead of
/// nominal playback. Live sources only get a short fixed pause, as does a
/// file whose frame rate is unknown (non-positive or not finite).
pub fn pause_after_frame(kind: SourceKind, fps: f64, config: &BufferConfig) -> Duration {
    match kind {
        SourceKind::File if fps > 0.0 && fps.is_finite() => {
            Duration::try_from_secs_f64(config.pacing_factor / fps)
                .unwrap_or(config.fallback_pause)
        }
        _ => config.fallback_pause,
    }
}

/// How long the worker waits after a failed read. Same for every source
/// kind; only the recovery action differs.
pub fn pause_after_failure(config: &BufferConfig) -> Duration {
    config.retry_pause
}
