use std::process;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;

use capture_buffer_core::buffering::buffer_config::BufferConfig;
use capture_buffer_core::buffering::frame_buffer::FrameBuffer;
use capture_buffer_core::capture::domain::source_descriptor::SourceDescriptor;
use capture_buffer_core::capture::infrastructure::ffmpeg_capture::FfmpegCaptureBackend;
use capture_buffer_core::shared::constants::DEFAULT_PACING_FACTOR;

/// Watch the latest frame of a video file, network stream, or camera.
#[derive(Parser)]
#[command(name = "capture-buffer")]
struct Cli {
    /// Video file path, stream URL, or camera index.
    source: String,

    /// How long to watch the source, in seconds.
    #[arg(long, default_value = "10")]
    duration: f64,

    /// Delay between polls of the buffer, in milliseconds.
    #[arg(long, default_value = "100")]
    poll_interval_ms: u64,

    /// Fraction of a file's frame interval to wait between reads.
    #[arg(long, default_value_t = DEFAULT_PACING_FACTOR)]
    pacing_factor: f64,

    /// Use TCP transport for RTSP streams.
    #[arg(long)]
    rtsp_tcp: bool,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    validate(&cli)?;

    let descriptor = parse_source(&cli.source);
    let backend = if cli.rtsp_tcp {
        FfmpegCaptureBackend::new().with_rtsp_transport("tcp")
    } else {
        FfmpegCaptureBackend::new()
    };
    let config = BufferConfig {
        pacing_factor: cli.pacing_factor,
        ..BufferConfig::default()
    };

    let buffer = FrameBuffer::with_backend(Box::new(backend), descriptor, config)?;
    log::info!(
        "Watching {} ({}) for {:.1}s",
        buffer.descriptor(),
        buffer.source_kind(),
        cli.duration
    );

    let stats = watch(
        &buffer,
        Duration::from_secs_f64(cli.duration),
        Duration::from_millis(cli.poll_interval_ms),
    );
    buffer.release();

    eprintln!(
        "{} polls, {} distinct frames, {} empty polls",
        stats.polls, stats.distinct_frames, stats.empty_polls
    );
    Ok(())
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if !(cli.duration.is_finite() && cli.duration >= 0.0) {
        return Err("--duration must be a non-negative number of seconds".into());
    }
    if cli.poll_interval_ms == 0 {
        return Err("--poll-interval-ms must be at least 1".into());
    }
    if !(cli.pacing_factor.is_finite() && cli.pacing_factor > 0.0) {
        return Err("--pacing-factor must be positive".into());
    }
    Ok(())
}

/// A bare integer selects a capture device; anything else is a path or URL.
fn parse_source(source: &str) -> SourceDescriptor {
    match source.parse::<u32>() {
        Ok(index) => SourceDescriptor::Index(index),
        Err(_) => SourceDescriptor::from(source),
    }
}

#[derive(Debug, Default, PartialEq)]
struct WatchStats {
    polls: usize,
    distinct_frames: usize,
    empty_polls: usize,
}

/// Polls `buffer` until `duration` elapses, logging each frame that differs
/// from the previous poll.
fn watch(buffer: &FrameBuffer, duration: Duration, poll_interval: Duration) -> WatchStats {
    let deadline = Instant::now() + duration;
    let mut stats = WatchStats::default();
    let mut last = None;

    loop {
        stats.polls += 1;
        match buffer.read() {
            Some(frame) => {
                let is_new = last
                    .as_ref()
                    .map_or(true, |previous| !std::sync::Arc::ptr_eq(previous, &frame));
                if is_new {
                    stats.distinct_frames += 1;
                    log::info!(
                        "Frame #{} {}x{}",
                        frame.index(),
                        frame.width(),
                        frame.height()
                    );
                }
                last = Some(frame);
            }
            None => stats.empty_polls += 1,
        }

        if Instant::now() >= deadline {
            return stats;
        }
        thread::sleep(poll_interval);
    }
}
