//! # Thermolog Core Library
//!
//! Reads `TEMP:<value>` frames from a serial thermometer, keeps three
//! retention-bounded views of the readings in memory and mirrors them to
//! append-only log files.
//!
//! ## Crate Structure
//!
//! - **`reader`**: `FrameReader`, which owns a serial port (or any `ByteSource`) and
//!   delivers terminator-delimited frames to a callback on a background thread.
//! - **`measurement`**: the `Measurement` type and the `FrameParser` that pulls the
//!   temperature field out of a frame.
//! - **`aggregation`**: the `AggregationEngine` holding the raw (24 h), hourly (30 d)
//!   and daily (365 d) series, and its thread-safe `SharedEngine` handle.
//! - **`storage`**: the `RetentionLogger`, persisting each series to its own CSV log and
//!   trimming it to the same retention window.
//! - **`pipeline`**: the frame handler tying parser, engine and logger together.
//! - **`monitor`**: `TemperatureMonitor`, the assembled system used by the binary.
//! - **`config`**, **`logging`**, **`error`**, **`clock`**: configuration loading,
//!   `tracing` setup, the error taxonomy and the time source.
//!
//! ## Example
//!
//! ```no_run
//! use thermolog::aggregation::Granularity;
//! use thermolog::config::MonitorConfig;
//! use thermolog::monitor::TemperatureMonitor;
//!
//! let config = MonitorConfig::load()?;
//! let mut monitor = TemperatureMonitor::new(&config)?;
//! monitor.start()?;
//! // ...
//! monitor.stop();
//! for point in monitor.snapshot(Granularity::Hourly) {
//!     println!("{} {:.2}", point.timestamp, point.value);
//! }
//! # Ok::<(), thermolog::error::MonitorError>(())
//! ```

pub mod aggregation;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod measurement;
pub mod monitor;
pub mod pipeline;
pub mod reader;
pub mod storage;
