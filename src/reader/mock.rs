//! Scripted byte source for tests and demos.
//!
//! A [`MockSource`] is driven from another thread through its
//! [`MockSourceHandle`]: bytes, injected I/O errors and end-of-stream are
//! delivered in the order they were sent, and an idle source times out like
//! a quiet serial line.

use super::source::ByteSource;
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

enum MockEvent {
    Data(Vec<u8>),
    Fail(io::ErrorKind),
    Close,
}

/// Byte source fed by a [`MockSourceHandle`].
pub struct MockSource {
    name: String,
    events: Receiver<MockEvent>,
    pending: Vec<u8>,
    poll: Duration,
    closed: bool,
}

/// Feeds a [`MockSource`]. Dropping every handle closes the stream.
#[derive(Clone)]
pub struct MockSourceHandle {
    events: Sender<MockEvent>,
}

impl MockSource {
    /// New source named `name` polling every 10 ms.
    pub fn new(name: &str) -> (Self, MockSourceHandle) {
        Self::with_poll_interval(name, Duration::from_millis(10))
    }

    /// New source with a custom idle timeout.
    pub fn with_poll_interval(name: &str, poll: Duration) -> (Self, MockSourceHandle) {
        let (tx, rx) = mpsc::channel();
        let source = Self {
            name: name.to_string(),
            events: rx,
            pending: Vec::new(),
            poll,
            closed: false,
        };
        (source, MockSourceHandle { events: tx })
    }

    fn drain_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        n
    }
}

impl ByteSource for MockSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.pending.is_empty() {
            return Ok(self.drain_pending(buf));
        }
        if self.closed {
            return Ok(0);
        }

        match self.events.recv_timeout(self.poll) {
            Ok(MockEvent::Data(bytes)) => {
                self.pending = bytes;
                Ok(self.drain_pending(buf))
            }
            Ok(MockEvent::Fail(kind)) => Err(io::Error::new(kind, "injected mock fault")),
            Ok(MockEvent::Close) | Err(RecvTimeoutError::Disconnected) => {
                self.closed = true;
                Ok(0)
            }
            Err(RecvTimeoutError::Timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "mock read timed out"))
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl MockSourceHandle {
    /// Queue raw bytes.
    pub fn send(&self, bytes: impl Into<Vec<u8>>) {
        // A stopped reader has dropped the source; nothing to deliver to
        let _ = self.events.send(MockEvent::Data(bytes.into()));
    }

    /// Queue text.
    pub fn send_str(&self, text: &str) {
        self.send(text.as_bytes().to_vec());
    }

    /// Make the next read fail with `kind`.
    pub fn fail(&self, kind: io::ErrorKind) {
        let _ = self.events.send(MockEvent::Fail(kind));
    }

    /// End the stream.
    pub fn close(&self) {
        let _ = self.events.send(MockEvent::Close);
    }
}
