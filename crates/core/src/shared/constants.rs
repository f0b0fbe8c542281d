use std::time::Duration;

/// Extensions (lowercase, no dot) that mark a descriptor as a video file.
pub const VIDEO_FILE_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mov", "mkv", "m4v", "webm", "mpg", "mpeg", "ts", "flv", "wmv",
];

/// URL schemes that mark a descriptor as a network stream.
pub const NETWORK_STREAM_SCHEMES: &[&str] =
    &["rtsp", "rtsps", "rtmp", "rtmps", "http", "https", "udp", "tcp", "srt"];

/// Fraction of a file's nominal frame interval to sleep between reads.
/// Below 1.0 so the buffer stays slightly ahead of playback.
pub const DEFAULT_PACING_FACTOR: f64 = 0.60;

/// Pause after a successful read from a live source, or from a file
/// without a usable frame rate.
pub const DEFAULT_FALLBACK_PAUSE: Duration = Duration::from_millis(10);

/// Pause after a failed read before trying again.
pub const DEFAULT_RETRY_PAUSE: Duration = Duration::from_secs(1);
