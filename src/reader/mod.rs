//! Serial frame reader.
//!
//! A [`FrameReader`] owns one [`ByteSource`], reassembles its bytes into
//! [`Frame`]s and hands each one to a callback on a background thread.

pub mod frame_reader;
pub mod framer;
pub mod mock;
pub mod source;

pub use frame_reader::{FrameHandler, FrameReader, StopToken};
pub use framer::{Frame, FrameAssembler};
pub use mock::{MockSource, MockSourceHandle};
pub use source::{ByteSource, SerialSource};
