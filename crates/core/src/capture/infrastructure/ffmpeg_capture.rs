use crate::capture::domain::capture_backend::{CaptureBackend, CaptureHandle};
use crate::capture::domain::capture_error::{OpenError, ReadFailure};
use crate::capture::domain::source_descriptor::{SourceDescriptor, SourceKind};
use crate::shared::frame::Frame;

/// Opens files, network streams and camera devices via ffmpeg-next
/// (libavformat + libavcodec + libavdevice).
///
/// Every decoded frame is converted to RGB24 and wrapped in a [`Frame`].
#[derive(Clone, Debug, Default)]
pub struct FfmpegCaptureBackend {
    rtsp_transport: Option<String>,
}

impl FfmpegCaptureBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the `rtsp_transport` demuxer option (`"tcp"`, `"udp"`, ...)
    /// used when opening network streams.
    pub fn with_rtsp_transport(mut self, transport: impl Into<String>) -> Self {
        self.rtsp_transport = Some(transport.into());
        self
    }

    fn open_input(
        &self,
        descriptor: &SourceDescriptor,
    ) -> Result<ffmpeg_next::format::context::Input, OpenError> {
        match (descriptor, descriptor.kind()) {
            (SourceDescriptor::Name(url), SourceKind::NetworkStream) => {
                let mut options = ffmpeg_next::Dictionary::new();
                if let Some(transport) = &self.rtsp_transport {
                    options.set("rtsp_transport", transport);
                }
                ffmpeg_next::format::input_with_dictionary(url, options)
                    .map_err(|e| OpenError::unavailable(descriptor, e))
            }
            (SourceDescriptor::Name(name), _) => ffmpeg_next::format::input(name)
                .map_err(|e| OpenError::unavailable(descriptor, e)),
            (SourceDescriptor::Index(index), _) => open_device(*index, descriptor),
        }
    }
}

impl CaptureBackend for FfmpegCaptureBackend {
    fn open(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn CaptureHandle>, OpenError> {
        ffmpeg_next::init().map_err(|e| OpenError::unavailable(descriptor, e))?;

        let input = self.open_input(descriptor)?;
        let session = CaptureSession::start(input, descriptor)?;
        log::debug!(
            "Opened {} ({}x{} @ {:.2} fps)",
            descriptor,
            session.width,
            session.height,
            session.fps
        );

        Ok(Box::new(FfmpegCaptureHandle {
            fps: session.fps,
            session: Some(session),
        }))
    }
}

/// Opens capture device `index` through the platform's libavdevice input.
fn open_device(
    index: u32,
    descriptor: &SourceDescriptor,
) -> Result<ffmpeg_next::format::context::Input, OpenError> {
    let unsupported = || OpenError::UnsupportedDevice {
        descriptor: descriptor.clone(),
    };

    ffmpeg_next::device::register_all();

    let (format_name, url) = device_url(index).ok_or_else(unsupported)?;
    let format = ffmpeg_next::device::input::video()
        .find(|f| f.name() == format_name)
        .ok_or_else(unsupported)?;

    match ffmpeg_next::format::open_with(&url, &format, ffmpeg_next::Dictionary::new()) {
        Ok(ffmpeg_next::format::context::Context::Input(input)) => Ok(input),
        Ok(_) => Err(unsupported()),
        Err(e) => Err(OpenError::unavailable(descriptor, e)),
    }
}

/// Demuxer name and device URL for capture device `index`.
fn device_url(index: u32) -> Option<(&'static str, String)> {
    #[cfg(target_os = "linux")]
    {
        Some(("v4l2", format!("/dev/video{index}")))
    }
    #[cfg(target_os = "macos")]
    {
        Some(("avfoundation", format!("{index}:none")))
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        let _ = index;
        None
    }
}

/// An open ffmpeg source. Dropping the session closes the input.
pub struct FfmpegCaptureHandle {
    session: Option<CaptureSession>,
    fps: f64,
}

// Safety: FfmpegCaptureHandle is only used from a single thread at a time.
// The raw pointers inside ffmpeg types are not shared across threads.
unsafe impl Send for FfmpegCaptureHandle {}

impl CaptureHandle for FfmpegCaptureHandle {
    fn read(&mut self) -> Result<Frame, ReadFailure> {
        match self.session.as_mut() {
            Some(session) => session.next_frame(),
            None => Err(ReadFailure::Closed),
        }
    }

    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn close(&mut self) {
        self.session = None;
    }
}

struct CaptureSession {
    input: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    video_stream_index: usize,
    width: u32,
    height: u32,
    fps: f64,
    frame_index: usize,
    draining: bool,
}

impl CaptureSession {
    fn start(
        input: ffmpeg_next::format::context::Input,
        descriptor: &SourceDescriptor,
    ) -> Result<Self, OpenError> {
        let stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| OpenError::NoVideoStream {
                descriptor: descriptor.clone(),
            })?;

        let video_stream_index = stream.index();
        let fps = stream_fps(&stream);
        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| OpenError::unavailable(descriptor, e))?;
        let decoder = codec_ctx
            .decoder()
            .video()
            .map_err(|e| OpenError::unavailable(descriptor, e))?;

        let width = decoder.width();
        let height = decoder.height();

        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg_next::format::Pixel::RGB24,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| OpenError::unavailable(descriptor, e))?;

        Ok(Self {
            input,
            decoder,
            scaler,
            video_stream_index,
            width,
            height,
            fps,
            frame_index: 0,
            draining: false,
        })
    }

    fn next_frame(&mut self) -> Result<Frame, ReadFailure> {
        loop {
            if let Some(frame) = self.try_receive()? {
                return Ok(frame);
            }

            if self.draining {
                return Err(ReadFailure::EndOfStream);
            }

            let mut packet = ffmpeg_next::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() != self.video_stream_index {
                        continue;
                    }
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        log::debug!("Skipping undecodable packet: {e}");
                    }
                }
                Err(ffmpeg_next::Error::Eof) => {
                    let _ = self.decoder.send_eof();
                    self.draining = true;
                }
                Err(e) => return Err(ReadFailure::Backend(Box::new(e))),
            }
        }
    }

    fn try_receive(&mut self) -> Result<Option<Frame>, ReadFailure> {
        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }

        let mut rgb_frame = ffmpeg_next::util::frame::video::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb_frame)
            .map_err(|e| ReadFailure::Backend(Box::new(e)))?;

        let pixels = extract_rgb_pixels(&rgb_frame, self.width, self.height);
        let frame = Frame::rgb(pixels, self.width, self.height, self.frame_index);
        self.frame_index += 1;
        Ok(Some(frame))
    }
}

/// Average frame rate of the stream, falling back to the container's
/// guess, or 0.0 when neither is known.
fn stream_fps(stream: &ffmpeg_next::format::stream::Stream) -> f64 {
    [stream.avg_frame_rate(), stream.rate()]
        .into_iter()
        .map(rational_to_f64)
        .find(|fps| *fps > 0.0)
        .unwrap_or(0.0)
}

fn rational_to_f64(rate: ffmpeg_next::Rational) -> f64 {
    if rate.denominator() != 0 {
        rate.numerator() as f64 / rate.denominator() as f64
    } else {
        0.0
    }
}

/// Copies pixel data from an ffmpeg frame into a contiguous RGB buffer,
/// dropping the per-row stride padding.
fn extract_rgb_pixels(
    rgb_frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let row_len = width as usize * 3;

    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in 0..height as usize {
        let row_start = row * stride;
        pixels.extend_from_slice(&data[row_start..row_start + row_len]);
    }
    pixels
}
