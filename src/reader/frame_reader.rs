//! Background frame reader.
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────────┐   bytes   ┌────────────────┐  frame  ┌──────────┐
//!   │  ByteSource  ├──────────►│ FrameAssembler ├────────►│ handler  │
//!   └──────────────┘           └────────────────┘         └──────────┘
//!          ▲          reader thread (owns all three)
//!          │
//!     StopToken ◄── stop() sets, thread polls between reads
//! ```
//!
//! The handler runs synchronously on the reader thread, so frames are handled
//! strictly in arrival order and the next read waits for the handler.
//! `stop()` sets the token and joins the thread; once it returns the handler
//! is never called again. The source and handler are handed back on join,
//! so a stopped reader can be started again.

use super::framer::{Frame, FrameAssembler};
use super::source::{is_transient, ByteSource, SerialSource};
use crate::config::DeviceConfig;
use crate::error::{OpenError, ReadFault, StartError};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Callback invoked once per complete frame.
pub type FrameHandler = Box<dyn FnMut(Frame) + Send + 'static>;

/// Cooperative cancellation flag shared with the reader thread.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    /// Fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// What the reader thread hands back when it exits.
struct WorkerExit {
    source: Option<Box<dyn ByteSource>>,
    handler: FrameHandler,
}

/// Reads frames from a [`ByteSource`] on a dedicated thread.
pub struct FrameReader {
    device: String,
    terminator: u8,
    max_frame_len: usize,
    source: Option<Box<dyn ByteSource>>,
    handler: Option<FrameHandler>,
    stop: StopToken,
    worker: Option<JoinHandle<WorkerExit>>,
    faults: Arc<watch::Sender<Option<ReadFault>>>,
    frames_delivered: Arc<AtomicU64>,
    frames_discarded: Arc<AtomicU64>,
}

impl FrameReader {
    /// Open a serial device with the default read timeout (100 ms).
    pub fn open(device: &str, baud_rate: u32) -> Result<Self, OpenError> {
        let source = SerialSource::open(device, baud_rate, Duration::from_millis(100))?;
        Ok(Self::from_source(Box::new(source)))
    }

    /// Open the serial device described by `config`.
    pub fn open_with(config: &DeviceConfig) -> Result<Self, OpenError> {
        let device = config.port_or_default();
        let source = SerialSource::open(&device, config.baud_rate, config.read_timeout())?;
        Ok(Self::from_source(Box::new(source))
            .with_terminator(config.terminator_byte())
            .with_max_frame_len(config.max_frame_len))
    }

    /// Wrap an already open source.
    pub fn from_source(source: Box<dyn ByteSource>) -> Self {
        let (faults, _) = watch::channel(None);
        Self {
            device: source.name().to_string(),
            terminator: b'\n',
            max_frame_len: 4096,
            source: Some(source),
            handler: None,
            stop: StopToken::new(),
            worker: None,
            faults: Arc::new(faults),
            frames_delivered: Arc::new(AtomicU64::new(0)),
            frames_discarded: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Set the frame terminator (default `\n`).
    pub fn with_terminator(mut self, terminator: u8) -> Self {
        self.terminator = terminator;
        self
    }

    /// Set the maximum partial frame length (default 4096 bytes).
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Register the frame callback. Takes effect on the next `start`.
    pub fn set_handler<F>(&mut self, handler: F)
    where
        F: FnMut(Frame) + Send + 'static,
    {
        self.handler = Some(Box::new(handler));
    }

    /// Device identifier.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Begin reading on a background thread. Returns immediately.
    pub fn start(&mut self) -> Result<(), StartError> {
        if self.is_running() {
            return Err(StartError::AlreadyRunning {
                device: self.device.clone(),
            });
        }
        // Reap a thread that ended on its own (fault or end of stream)
        self.join_worker();

        if self.handler.is_none() {
            return Err(StartError::NoHandler);
        }
        let Some(source) = self.source.take() else {
            return Err(StartError::NotOpen {
                device: self.device.clone(),
            });
        };
        let handler = self.handler.take().ok_or(StartError::NoHandler)?;

        self.stop.reset();
        self.faults.send_replace(None);

        let worker = Worker {
            device: self.device.clone(),
            assembler: FrameAssembler::new(self.terminator, self.max_frame_len),
            stop: self.stop.clone(),
            faults: Arc::clone(&self.faults),
            frames_delivered: Arc::clone(&self.frames_delivered),
            frames_discarded: Arc::clone(&self.frames_discarded),
        };

        let handle = thread::Builder::new()
            .name("frame-reader".to_string())
            .spawn(move || worker.run(source, handler))
            .map_err(StartError::Spawn)?;
        self.worker = Some(handle);

        info!(device = %self.device, "Frame reader started");
        Ok(())
    }

    /// Stop the reader thread and wait for it to exit.
    ///
    /// Idempotent, and a no-op if the reader never started.
    pub fn stop(&mut self) {
        self.stop.cancel();
        if self.join_worker() {
            info!(
                device = %self.device,
                frames = self.frames_delivered(),
                discarded = self.frames_discarded(),
                "Frame reader stopped"
            );
        }
    }

    fn join_worker(&mut self) -> bool {
        let Some(handle) = self.worker.take() else {
            return false;
        };
        match handle.join() {
            Ok(exit) => {
                self.source = exit.source;
                self.handler = Some(exit.handler);
            }
            Err(e) => {
                error!(device = %self.device, "Reader thread panicked: {:?}", e);
            }
        }
        true
    }

    /// Whether the reader thread is alive.
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Whether a device is held and could be started.
    pub fn is_open(&self) -> bool {
        self.source.is_some() || self.is_running()
    }

    /// The fault that stopped the current run, if any.
    pub fn fault(&self) -> Option<ReadFault> {
        self.faults.borrow().clone()
    }

    /// Receiver notified when a fault stops the reader.
    pub fn subscribe_faults(&self) -> watch::Receiver<Option<ReadFault>> {
        self.faults.subscribe()
    }

    /// Total frames handed to the handler.
    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

    /// Total oversize frames dropped before reaching the handler.
    pub fn frames_discarded(&self) -> u64 {
        self.frames_discarded.load(Ordering::Relaxed)
    }
}

impl Drop for FrameReader {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State moved onto the reader thread.
struct Worker {
    device: String,
    assembler: FrameAssembler,
    stop: StopToken,
    faults: Arc<watch::Sender<Option<ReadFault>>>,
    frames_delivered: Arc<AtomicU64>,
    frames_discarded: Arc<AtomicU64>,
}

impl Worker {
    fn run(mut self, mut source: Box<dyn ByteSource>, mut handler: FrameHandler) -> WorkerExit {
        let mut buf = [0u8; 1024];

        let source = loop {
            if self.stop.is_cancelled() {
                break Some(source);
            }

            match source.read(&mut buf) {
                Ok(0) => {
                    let lost = self.assembler.discard_partial();
                    if lost > 0 {
                        debug!(device = %self.device, lost, "Stream ended mid-frame");
                    }
                    let err = io::Error::new(io::ErrorKind::UnexpectedEof, "stream closed");
                    self.report(ReadFault::from_io(&self.device, &err));
                    break None;
                }
                Ok(n) => {
                    let before = self.assembler.discarded();
                    let delivered = &self.frames_delivered;
                    self.assembler.push(&buf[..n], |frame| {
                        handler(frame);
                        delivered.fetch_add(1, Ordering::Relaxed);
                    });
                    let dropped = self.assembler.discarded() - before;
                    if dropped > 0 {
                        self.frames_discarded.fetch_add(dropped, Ordering::Relaxed);
                    }
                }
                Err(e) if is_transient(&e) => continue,
                Err(e) => {
                    self.assembler.discard_partial();
                    self.report(ReadFault::from_io(&self.device, &e));
                    break None;
                }
            }
        };

        debug!(device = %self.device, "Reader thread exiting");
        WorkerExit { source, handler }
    }

    fn report(&self, fault: ReadFault) {
        error!(device = %fault.device, kind = ?fault.kind, "Read fault: {}", fault.message);
        self.faults.send_replace(Some(fault));
    }
}

impl std::fmt::Debug for FrameReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReader")
            .field("device", &self.device)
            .field("running", &self.is_running())
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::mock::MockSource;
    use parking_lot::Mutex;
    use std::time::Instant;

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn start_without_handler_fails() {
        let (source, _handle) = MockSource::new("mock");
        let mut reader = FrameReader::from_source(Box::new(source));
        assert!(matches!(reader.start(), Err(StartError::NoHandler)));
        assert!(!reader.is_running());
    }

    #[test]
    fn double_start_is_rejected() {
        let (source, _handle) = MockSource::new("mock");
        let mut reader = FrameReader::from_source(Box::new(source));
        reader.set_handler(|_| {});
        reader.start().unwrap();
        assert!(matches!(reader.start(), Err(StartError::AlreadyRunning { .. })));
        reader.stop();
    }

    #[test]
    fn restart_after_stop_reuses_source() {
        let (source, handle) = MockSource::new("mock");
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&frames);

        let mut reader = FrameReader::from_source(Box::new(source));
        reader.set_handler(move |f: Frame| sink.lock().push(f.into_string()));

        reader.start().unwrap();
        handle.send_str("one\n");
        assert!(wait_for(|| frames.lock().len() == 1));
        reader.stop();

        reader.start().unwrap();
        handle.send_str("two\n");
        assert!(wait_for(|| frames.lock().len() == 2));
        reader.stop();

        assert_eq!(*frames.lock(), vec!["one", "two"]);
        assert_eq!(reader.frames_delivered(), 2);
    }

    #[test]
    fn fault_is_published_and_device_released() {
        let (source, handle) = MockSource::new("mock");
        let mut reader = FrameReader::from_source(Box::new(source));
        reader.set_handler(|_| {});
        reader.start().unwrap();

        handle.fail(io::ErrorKind::BrokenPipe);
        assert!(wait_for(|| reader.fault().is_some()));
        assert!(wait_for(|| !reader.is_running()));

        reader.stop();
        assert_eq!(reader.fault().unwrap().kind, io::ErrorKind::BrokenPipe);
        assert!(!reader.is_open());
        assert!(matches!(reader.start(), Err(StartError::NotOpen { .. })));
    }

    #[test]
    fn stop_token_round_trip() {
        let token = StopToken::new();
        assert!(!token.is_cancelled());
        token.clone().cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!token.is_cancelled());
    }
}
