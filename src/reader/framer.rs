//! Reassembly of a byte stream into terminator-delimited frames.

use std::fmt;
use std::ops::Deref;
use tracing::warn;

/// One complete frame of device output, terminator removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(String);

impl Frame {
    /// Frame from text.
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Frame text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Take the text.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl Deref for Frame {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Buffers bytes and splits off a frame at every terminator.
///
/// Bytes after the last terminator stay buffered until more data arrives. A
/// `\r` directly before the terminator is dropped so CRLF devices produce the
/// same frames as LF devices. Invalid UTF-8 is replaced, not rejected.
///
/// A segment longer than `max_frame_len` is dropped whole, through its
/// terminator, however the bytes were split across reads.
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
    terminator: u8,
    max_frame_len: usize,
    discarding: bool,
    discarded: u64,
}

impl FrameAssembler {
    /// Assembler splitting on `terminator`, dropping partial frames longer than `max_frame_len`.
    pub fn new(terminator: u8, max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            terminator,
            max_frame_len,
            discarding: false,
            discarded: 0,
        }
    }

    /// Append `bytes` and hand every completed frame to `emit`, in order.
    pub fn push(&mut self, bytes: &[u8], mut emit: impl FnMut(Frame)) {
        let mut bytes = bytes;
        if self.discarding {
            // Still inside an oversize segment: skip through its terminator
            match bytes.iter().position(|&b| b == self.terminator) {
                Some(offset) => {
                    self.discarding = false;
                    bytes = &bytes[offset + 1..];
                }
                None => return,
            }
        }
        self.buffer.extend_from_slice(bytes);

        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..]
            .iter()
            .position(|&b| b == self.terminator)
        {
            let end = consumed + offset;
            let line = self.strip_cr(&self.buffer[consumed..end]);
            if line.len() > self.max_frame_len {
                warn!(len = line.len(), max = self.max_frame_len, "Discarding oversize frame");
                self.discarded += 1;
            } else {
                emit(Frame(String::from_utf8_lossy(line).into_owned()));
            }
            consumed = end + 1;
        }
        self.buffer.drain(..consumed);

        // A pending `\r` may still be followed by the terminator
        let pending = self.strip_cr(&self.buffer).len();
        if pending > self.max_frame_len {
            warn!(
                len = pending,
                max = self.max_frame_len,
                "Discarding oversize partial frame"
            );
            self.discarded += 1;
            self.buffer.clear();
            self.discarding = true;
        }
    }

    fn strip_cr<'a>(&self, line: &'a [u8]) -> &'a [u8] {
        if self.terminator == b'\r' {
            return line;
        }
        line.strip_suffix(b"\r").unwrap_or(line)
    }

    /// Drop any partial frame, returning how many bytes were lost.
    pub fn discard_partial(&mut self) -> usize {
        let len = self.buffer.len();
        self.buffer.clear();
        self.discarding = false;
        len
    }

    /// Bytes waiting for a terminator.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Oversize frames dropped so far.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}
