use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::buffering::buffer_config::BufferConfig;
use crate::buffering::pacing::{pause_after_failure, pause_after_frame};
use crate::capture::domain::capture_backend::{CaptureBackend, CaptureHandle};
use crate::capture::domain::capture_error::{OpenError, ReadFailure};
use crate::capture::domain::source_descriptor::{SourceDescriptor, SourceKind};
use crate::capture::infrastructure::ffmpeg_capture::FfmpegCaptureBackend;
use crate::shared::frame::Frame;

type Slot = Mutex<Option<Arc<Frame>>>;

/// Keeps the most recent frame of a video source available without making
/// callers wait on source I/O.
///
/// A dedicated worker thread reads frames continuously and overwrites a
/// single shared slot. [`read`](Self::read) only clones whatever the slot
/// holds. Failed reads never reach the caller: network streams and devices
/// are retried, files are reopened from the start, and the last good frame
/// stays visible meanwhile.
///
/// Layout: `source → worker [read/pace/recover] → slot → read()`
pub struct FrameBuffer {
    descriptor: SourceDescriptor,
    kind: SourceKind,
    slot: Arc<Slot>,
    stopped: Arc<AtomicBool>,
    stop_signal: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<Option<Box<dyn CaptureHandle>>>>>,
}

impl FrameBuffer {
    /// Opens `descriptor` with the ffmpeg backend and default timing.
    pub fn open(descriptor: impl Into<SourceDescriptor>) -> Result<Self, OpenError> {
        Self::with_backend(
            Box::new(FfmpegCaptureBackend::new()),
            descriptor,
            BufferConfig::default(),
        )
    }

    /// Opens `descriptor` through `backend` and starts the worker.
    ///
    /// On error nothing keeps running: the worker is only spawned once the
    /// source is open.
    pub fn with_backend(
        backend: Box<dyn CaptureBackend>,
        descriptor: impl Into<SourceDescriptor>,
        config: BufferConfig,
    ) -> Result<Self, OpenError> {
        let descriptor = descriptor.into();
        let kind = descriptor.kind();

        let handle = backend.open(&descriptor)?;
        log::info!("Opened {kind} source {descriptor}");

        let slot: Arc<Slot> = Arc::new(Mutex::new(None));
        let stopped = Arc::new(AtomicBool::new(false));
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);

        let worker = Worker {
            backend,
            descriptor: descriptor.clone(),
            kind,
            config,
            handle: Some(handle),
            slot: Arc::clone(&slot),
            stopped: Arc::clone(&stopped),
            stop_rx,
        };

        let join_handle = std::thread::Builder::new()
            .name("capture-buffer".to_string())
            .spawn(move || worker.run())
            .map_err(|source| OpenError::Spawn {
                descriptor: descriptor.clone(),
                source,
            })?;

        Ok(Self {
            descriptor,
            kind,
            slot,
            stopped,
            stop_signal: Mutex::new(Some(stop_tx)),
            worker: Mutex::new(Some(join_handle)),
        })
    }

    /// The latest frame, or `None` if the source has not produced one yet.
    ///
    /// Never blocks on the worker's I/O; the lock is only held for the
    /// duration of an `Arc` clone.
    pub fn read(&self) -> Option<Arc<Frame>> {
        lock(&self.slot).clone()
    }

    /// Whether a frame has ever been produced.
    pub fn has_frame(&self) -> bool {
        lock(&self.slot).is_some()
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    pub fn source_kind(&self) -> SourceKind {
        self.kind
    }

    pub fn is_released(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stops the worker, waits for it to exit, and closes the source.
    ///
    /// A worker sleeping between reads wakes immediately; one blocked inside
    /// a source read is waited for. Safe to call more than once and from
    /// several threads. The last frame stays readable afterwards.
    pub fn release(&self) {
        self.stopped.store(true, Ordering::Release);
        drop(lock(&self.stop_signal).take());

        let mut worker = lock(&self.worker);
        let Some(join_handle) = worker.take() else {
            return;
        };

        match join_handle.join() {
            Ok(Some(mut handle)) => handle.close(),
            Ok(None) => {}
            Err(_) => log::error!("Capture worker for {} panicked", self.descriptor),
        }
        log::info!("Released {}", self.descriptor);
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State owned by the worker thread. The capture handle never leaves this
/// thread until the worker returns it to [`FrameBuffer::release`].
struct Worker {
    backend: Box<dyn CaptureBackend>,
    descriptor: SourceDescriptor,
    kind: SourceKind,
    config: BufferConfig,
    handle: Option<Box<dyn CaptureHandle>>,
    slot: Arc<Slot>,
    stopped: Arc<AtomicBool>,
    stop_rx: Receiver<()>,
}

impl Worker {
    fn run(mut self) -> Option<Box<dyn CaptureHandle>> {
        while !self.stopped.load(Ordering::Acquire) {
            let pause = match self.read_frame() {
                Ok(frame) => {
                    *lock(&self.slot) = Some(Arc::new(frame));
                    pause_after_frame(self.kind, self.frame_rate(), &self.config)
                }
                Err(failure) => {
                    self.recover(&failure);
                    pause_after_failure(&self.config)
                }
            };
            self.wait(pause);
        }
        log::debug!("Capture worker for {} stopped", self.descriptor);
        self.handle
    }

    fn read_frame(&mut self) -> Result<Frame, ReadFailure> {
        match self.handle.as_mut() {
            Some(handle) => handle.read(),
            None => Err(ReadFailure::Closed),
        }
    }

    fn frame_rate(&self) -> f64 {
        self.handle.as_ref().map_or(0.0, |handle| handle.frame_rate())
    }

    fn recover(&mut self, failure: &ReadFailure) {
        match self.kind {
            SourceKind::NetworkStream => {
                log::error!(
                    "Failed to capture frame from {}: {failure}; retrying",
                    self.descriptor
                );
            }
            SourceKind::File => {
                log::warn!(
                    "End of {} reached or read failed ({failure}); reopening",
                    self.descriptor
                );
                self.reopen();
            }
            SourceKind::Device => {
                log::error!(
                    "Failed to read frame from {}: {failure}; retrying",
                    self.descriptor
                );
            }
        }
    }

    /// Replaces the handle with a fresh one positioned at the start. A failed
    /// open leaves no handle, so the next read fails and lands here again.
    fn reopen(&mut self) {
        if let Some(mut old) = self.handle.take() {
            old.close();
        }
        match self.backend.open(&self.descriptor) {
            Ok(handle) => self.handle = Some(handle),
            Err(e) => log::warn!("Reopen failed: {e}"),
        }
    }

    /// Sleeps for `pause`, returning early once the buffer is released
    /// (the sender is dropped).
    fn wait(&self, pause: Duration) {
        let _ = self.stop_rx.recv_timeout(pause);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::thread;
    use std::time::Instant;

    const FRAME_W: u32 = 4;
    const FRAME_H: u32 = 2;

    #[derive(Default)]
    struct Counters {
        open_attempts: usize,
        closes: usize,
        reads: usize,
        frames_served: usize,
    }

    /// Backend whose n-th successful open yields the frame values in
    /// `sessions[n]`, then reports end of stream. Each frame is filled with
    /// its value so tearing would be visible.
    struct ScriptedBackend {
        sessions: Vec<Vec<u8>>,
        cycle: bool,
        max_opens: Option<usize>,
        fps: f64,
        counters: Arc<Mutex<Counters>>,
    }

    impl ScriptedBackend {
        fn new(sessions: Vec<Vec<u8>>) -> Self {
            Self {
                sessions,
                cycle: false,
                max_opens: None,
                fps: 1000.0,
                counters: Arc::new(Mutex::new(Counters::default())),
            }
        }

        fn cycling(mut self) -> Self {
            self.cycle = true;
            self
        }

        fn max_opens(mut self, max: usize) -> Self {
            self.max_opens = Some(max);
            self
        }

        fn fps(mut self, fps: f64) -> Self {
            self.fps = fps;
            self
        }

        fn counters(&self) -> Arc<Mutex<Counters>> {
            Arc::clone(&self.counters)
        }
    }

    impl CaptureBackend for ScriptedBackend {
        fn open(
            &self,
            descriptor: &SourceDescriptor,
        ) -> Result<Box<dyn CaptureHandle>, OpenError> {
            let mut counters = self.counters.lock().unwrap();
            let attempt = counters.open_attempts;
            counters.open_attempts += 1;

            if self.max_opens.is_some_and(|max| attempt >= max) {
                return Err(OpenError::unavailable(descriptor, "source is gone"));
            }

            let session = if self.cycle && !self.sessions.is_empty() {
                self.sessions[attempt % self.sessions.len()].clone()
            } else {
                self.sessions.get(attempt).cloned().unwrap_or_default()
            };

            Ok(Box::new(ScriptedHandle {
                values: session.into(),
                index: 0,
                fps: self.fps,
                closed: false,
                counters: Arc::clone(&self.counters),
            }))
        }
    }

    struct ScriptedHandle {
        values: VecDeque<u8>,
        index: usize,
        fps: f64,
        closed: bool,
        counters: Arc<Mutex<Counters>>,
    }

    impl CaptureHandle for ScriptedHandle {
        fn read(&mut self) -> Result<Frame, ReadFailure> {
            if self.closed {
                return Err(ReadFailure::Closed);
            }
            let mut counters = self.counters.lock().unwrap();
            counters.reads += 1;
            let value = self.values.pop_front().ok_or(ReadFailure::EndOfStream)?;
            counters.frames_served += 1;

            let data = vec![value; (FRAME_W * FRAME_H * 3) as usize];
            let frame = Frame::rgb(data, FRAME_W, FRAME_H, self.index);
            self.index += 1;
            Ok(frame)
        }

        fn frame_rate(&self) -> f64 {
            self.fps
        }

        fn close(&mut self) {
            if !self.closed {
                self.closed = true;
                self.counters.lock().unwrap().closes += 1;
            }
        }
    }

    /// Backend that never opens anything.
    struct UnavailableBackend {
        counters: Arc<Mutex<Counters>>,
    }

    impl CaptureBackend for UnavailableBackend {
        fn open(
            &self,
            descriptor: &SourceDescriptor,
        ) -> Result<Box<dyn CaptureHandle>, OpenError> {
            self.counters.lock().unwrap().open_attempts += 1;
            Err(OpenError::unavailable(descriptor, "connection refused"))
        }
    }

    fn fast_config() -> BufferConfig {
        BufferConfig {
            pacing_factor: 0.6,
            fallback_pause: Duration::from_millis(1),
            retry_pause: Duration::from_millis(20),
        }
    }

    fn start(backend: ScriptedBackend, descriptor: impl Into<SourceDescriptor>) -> FrameBuffer {
        FrameBuffer::with_backend(Box::new(backend), descriptor, fast_config()).unwrap()
    }

    fn value_of(frame: &Frame) -> u8 {
        frame.data()[0]
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    // ── Construction ─────────────────────────────────────────────────

    #[test]
    fn test_failed_open_returns_error_and_starts_nothing() {
        let counters = Arc::new(Mutex::new(Counters::default()));
        let backend = UnavailableBackend {
            counters: Arc::clone(&counters),
        };

        let result =
            FrameBuffer::with_backend(Box::new(backend), "rtsp://cam/live", fast_config());

        let err = result.err().expect("open should fail");
        assert_eq!(err.descriptor(), &SourceDescriptor::from("rtsp://cam/live"));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(counters.lock().unwrap().open_attempts, 1);
    }

    #[test]
    fn test_classifies_source_at_construction() {
        let file = start(ScriptedBackend::new(vec![]), "clip.MKV");
        let stream = start(ScriptedBackend::new(vec![]), "rtsp://cam/live");
        let device = start(ScriptedBackend::new(vec![]), 0u32);

        assert_eq!(file.source_kind(), SourceKind::File);
        assert_eq!(stream.source_kind(), SourceKind::NetworkStream);
        assert_eq!(device.source_kind(), SourceKind::Device);
        assert_eq!(device.descriptor(), &SourceDescriptor::Index(0));
    }

    // ── Reading ──────────────────────────────────────────────────────

    #[test]
    fn test_read_is_none_until_a_frame_arrives() {
        let buffer = start(ScriptedBackend::new(vec![vec![]]), 1u32);

        thread::sleep(Duration::from_millis(50));

        assert!(buffer.read().is_none());
        assert!(!buffer.has_frame());
    }

    #[test]
    fn test_read_returns_latest_frame() {
        let buffer = start(ScriptedBackend::new(vec![vec![1, 2, 3]]), 2u32);

        assert!(wait_until(Duration::from_secs(2), || {
            buffer.read().is_some_and(|f| value_of(&f) == 3)
        }));
        assert!(buffer.has_frame());
        assert_eq!(buffer.read().unwrap().index(), 2);
    }

    #[test]
    fn test_concurrent_readers_never_see_partial_frames() {
        let values: Vec<u8> = (0..=255).cycle().take(5000).collect();
        let buffer = Arc::new(start(ScriptedBackend::new(vec![values]), 0u32));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    let deadline = Instant::now() + Duration::from_millis(100);
                    while Instant::now() < deadline {
                        if let Some(frame) = buffer.read() {
                            let first = value_of(&frame);
                            assert!(frame.data().iter().all(|&b| b == first));
                            assert_eq!(frame.data().len(), (FRAME_W * FRAME_H * 3) as usize);
                        }
                    }
                })
            })
            .collect();

        for reader in readers {
            reader.join().unwrap();
        }
        buffer.release();
    }

    // ── Failure handling ─────────────────────────────────────────────

    #[test]
    fn test_network_failures_keep_last_frame_and_do_not_reopen() {
        let backend = ScriptedBackend::new(vec![vec![7]]);
        let counters = backend.counters();
        let buffer = start(backend, "rtsp://cam/live");

        assert!(wait_until(Duration::from_secs(2), || buffer.has_frame()));
        let reads_before = counters.lock().unwrap().reads;
        thread::sleep(Duration::from_millis(150));

        assert_eq!(value_of(&buffer.read().unwrap()), 7);
        let counters = counters.lock().unwrap();
        assert!(counters.reads > reads_before, "worker should keep retrying");
        assert_eq!(counters.open_attempts, 1);
        assert_eq!(counters.closes, 0);
    }

    #[test]
    fn test_network_without_any_frame_stays_empty() {
        let backend = ScriptedBackend::new(vec![vec![]]);
        let counters = backend.counters();
        let buffer = start(backend, "rtsp://cam/live");

        thread::sleep(Duration::from_millis(150));

        assert!(buffer.read().is_none());
        assert!(counters.lock().unwrap().reads >= 2);
    }

    #[test]
    fn test_device_failures_retry_on_same_handle() {
        let backend = ScriptedBackend::new(vec![vec![5]]);
        let counters = backend.counters();
        let buffer = start(backend, 3u32);

        assert!(wait_until(Duration::from_secs(2), || {
            counters.lock().unwrap().reads >= 3
        }));

        assert_eq!(value_of(&buffer.read().unwrap()), 5);
        assert_eq!(counters.lock().unwrap().open_attempts, 1);
    }

    #[test]
    fn test_file_reopens_after_exhaustion_and_reaches_fifth_frame() {
        let backend = ScriptedBackend::new(vec![vec![1, 2, 3], vec![4, 5]]);
        let counters = backend.counters();
        let buffer = start(backend, "clip.mp4");

        let mut observed = Vec::new();
        let reached = wait_until(Duration::from_secs(2), || {
            if let Some(frame) = buffer.read() {
                if observed.last() != Some(&value_of(&frame)) {
                    observed.push(value_of(&frame));
                }
            }
            observed.last() == Some(&5)
        });

        assert!(reached, "observed {observed:?}");
        assert!(observed.windows(2).all(|w| w[0] < w[1]));
        let counters = counters.lock().unwrap();
        assert!(counters.open_attempts >= 2);
        assert!(counters.closes >= 1);
    }

    #[test]
    fn test_file_recovers_after_every_exhaustion() {
        let backend = ScriptedBackend::new(vec![vec![1, 2]]).cycling();
        let counters = backend.counters();
        let buffer = start(backend, "loop.avi");

        assert!(wait_until(Duration::from_secs(2), || {
            counters.lock().unwrap().frames_served >= 6
        }));
        buffer.release();

        let counters = counters.lock().unwrap();
        assert!(counters.open_attempts >= 3);
        assert_eq!(counters.closes, counters.open_attempts);
    }

    #[test]
    fn test_failed_reopen_keeps_last_frame_and_keeps_trying() {
        let backend = ScriptedBackend::new(vec![vec![9]]).max_opens(1);
        let counters = backend.counters();
        let buffer = start(backend, "clip.mov");

        assert!(wait_until(Duration::from_secs(2), || {
            counters.lock().unwrap().open_attempts >= 3
        }));

        assert_eq!(value_of(&buffer.read().unwrap()), 9);
        assert_eq!(counters.lock().unwrap().closes, 1);
        buffer.release();
    }

    #[test]
    fn test_file_is_paced_by_frame_rate() {
        // 0.6 / 1 fps = 600 ms between reads
        let backend = ScriptedBackend::new(vec![vec![1, 2, 3]]).fps(1.0);
        let counters = backend.counters();
        let buffer = start(backend, "slow.mp4");

        assert!(wait_until(Duration::from_secs(1), || buffer.has_frame()));
        thread::sleep(Duration::from_millis(100));

        assert_eq!(counters.lock().unwrap().reads, 1);
    }

    // ── Release ──────────────────────────────────────────────────────

    #[test]
    fn test_release_closes_handle_and_stops_reads() {
        let backend = ScriptedBackend::new(vec![vec![1, 2, 3]]);
        let counters = backend.counters();
        let buffer = start(backend, "rtsp://cam/live");
        assert!(wait_until(Duration::from_secs(2), || buffer.has_frame()));

        buffer.release();
        let reads_after_release = counters.lock().unwrap().reads;
        thread::sleep(Duration::from_millis(60));

        let counters = counters.lock().unwrap();
        assert_eq!(counters.reads, reads_after_release);
        assert_eq!(counters.closes, 1);
        assert!(buffer.is_released());
    }

    #[test]
    fn test_release_wakes_worker_from_retry_pause() {
        let backend = ScriptedBackend::new(vec![vec![]]);
        let counters = backend.counters();
        let config = BufferConfig {
            retry_pause: Duration::from_secs(30),
            ..fast_config()
        };
        let buffer =
            FrameBuffer::with_backend(Box::new(backend), "rtsp://cam/live", config).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            counters.lock().unwrap().reads >= 1
        }));

        let started = Instant::now();
        buffer.release();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(counters.lock().unwrap().closes, 1);
    }

    #[test]
    fn test_release_is_idempotent_and_keeps_last_frame() {
        let backend = ScriptedBackend::new(vec![vec![4]]);
        let counters = backend.counters();
        let buffer = start(backend, 0u32);
        assert!(wait_until(Duration::from_secs(2), || buffer.has_frame()));

        buffer.release();
        buffer.release();

        assert_eq!(value_of(&buffer.read().unwrap()), 4);
        assert!(buffer.has_frame());
        assert_eq!(counters.lock().unwrap().closes, 1);
    }

    #[test]
    fn test_concurrent_release_from_many_threads() {
        let backend = ScriptedBackend::new(vec![vec![1]]);
        let counters = backend.counters();
        let buffer = Arc::new(start(backend, 0u32));

        let releasers: Vec<_> = (0..3)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || buffer.release())
            })
            .collect();
        for releaser in releasers {
            releaser.join().unwrap();
        }

        assert_eq!(counters.lock().unwrap().closes, 1);
    }

    #[test]
    fn test_drop_releases() {
        let backend = ScriptedBackend::new(vec![vec![1, 2]]);
        let counters = backend.counters();
        let buffer = start(backend, "rtsp://cam/live");
        assert!(wait_until(Duration::from_secs(2), || buffer.has_frame()));

        drop(buffer);

        assert_eq!(counters.lock().unwrap().closes, 1);
    }

    #[test]
    fn test_release_after_failed_reopen_has_nothing_to_close() {
        let backend = ScriptedBackend::new(vec![vec![]]).max_opens(1);
        let counters = backend.counters();
        let buffer = start(backend, "gone.mp4");
        assert!(wait_until(Duration::from_secs(2), || {
            counters.lock().unwrap().open_attempts >= 2
        }));

        buffer.release();

        assert_eq!(counters.lock().unwrap().closes, 1);
        assert!(buffer.read().is_none());
    }
}
