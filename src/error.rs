//! Custom error types for the application.
//!
//! Each subsystem owns its error type so that callers can tell which
//! failures are fatal and which are confined to a single frame or write:
//!
//! - **`OpenError`**: the device could not be opened. Fatal to startup.
//! - **`StartError`**: the reader is misconfigured (no handler, no device). Fatal to startup.
//! - **`MalformedMeasurement`**: a frame carried the temperature marker but no usable
//!   number. Reported and skipped; ingestion continues.
//! - **`ReadFault`**: the device failed while streaming. Stops the reader thread and is
//!   published once to the caller. Never retried here.
//! - **`PersistenceError`**: a log append or trim failed. Reported; the in-memory
//!   aggregation is unaffected.
//!
//! `MonitorError` folds all of these together with configuration errors for the
//! top-level API, so the `?` operator works across subsystem boundaries.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, MonitorError>;

/// Failure to open the byte-stream device.
#[derive(Error, Debug)]
pub enum OpenError {
    /// Device does not exist.
    #[error("Failed to open device '{device}': {message}")]
    DeviceNotFound {
        /// Device path or name.
        device: String,
        /// Driver message.
        message: String,
    },

    /// Permission denied when accessing the device
    #[error("Permission denied for device '{device}'. Check udev rules or group membership.")]
    PermissionDenied {
        /// Device path or name.
        device: String,
    },

    /// Device is already in use by another process
    #[error("Device '{device}' is busy (in use by another process)")]
    DeviceBusy {
        /// Device path or name.
        device: String,
    },

    /// The device or driver rejected the requested baud rate.
    #[error("Unsupported baud rate {baud_rate} for device '{device}'")]
    UnsupportedBaudRate {
        /// Device path or name.
        device: String,
        /// Rejected rate.
        baud_rate: u32,
    },

    /// Serial transport was compiled out.
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    /// Any other I/O failure during open.
    #[error("I/O error opening '{device}': {source}")]
    Io {
        /// Device path or name.
        device: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Failure to start the background reader.
#[derive(Error, Debug)]
pub enum StartError {
    /// `start` was called before `set_handler`.
    #[error("No frame handler registered")]
    NoHandler,

    /// The device is not open, or was lost to an earlier read fault.
    #[error("Device '{device}' is not open")]
    NotOpen {
        /// Device path or name.
        device: String,
    },

    /// The reader thread is already running.
    #[error("Reader for '{device}' is already running")]
    AlreadyRunning {
        /// Device path or name.
        device: String,
    },

    /// The OS refused to spawn the reader thread.
    #[error("Failed to spawn reader thread: {0}")]
    Spawn(#[source] io::Error),
}

/// A frame carried the temperature marker but the field could not be parsed.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Malformed measurement in frame '{frame}': field '{field}' {reason}")]
pub struct MalformedMeasurement {
    /// The offending frame text.
    pub frame: String,
    /// The raw field text following the marker.
    pub field: String,
    /// Why the field was rejected.
    pub reason: String,
}

/// The device failed while the reader thread was streaming.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Read fault on '{device}' ({kind:?}): {message}")]
pub struct ReadFault {
    /// Device identifier the fault occurred on.
    pub device: String,
    /// Underlying I/O error kind.
    pub kind: io::ErrorKind,
    /// Human readable description.
    pub message: String,
}

impl ReadFault {
    pub(crate) fn from_io(device: &str, err: &io::Error) -> Self {
        Self {
            device: device.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Failure to append to or trim a retention log.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// File system error.
    #[error("I/O error on log '{}': {source}", .path.display())]
    Io {
        /// Log file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Record could not be encoded or decoded.
    #[error("CSV error on log '{}': {source}", .path.display())]
    Csv {
        /// Log file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: csv::Error,
    },
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }
}

/// Application-level error.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Configuration could not be loaded or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Device could not be opened.
    #[error(transparent)]
    Open(#[from] OpenError),

    /// Reader could not be started.
    #[error(transparent)]
    Start(#[from] StartError),

    /// A frame carried an unusable temperature field.
    #[error(transparent)]
    Malformed(#[from] MalformedMeasurement),

    /// The device failed while streaming.
    #[error(transparent)]
    ReadFault(#[from] ReadFault),

    /// A retention log could not be opened or written.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl From<figment::Error> for MonitorError {
    fn from(err: figment::Error) -> Self {
        MonitorError::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_fault_keeps_io_kind() {
        let err = io::Error::new(io::ErrorKind::BrokenPipe, "cable pulled");
        let fault = ReadFault::from_io("/dev/ttyUSB0", &err);
        assert_eq!(fault.kind, io::ErrorKind::BrokenPipe);
        assert!(fault.to_string().contains("/dev/ttyUSB0"));
        assert!(fault.to_string().contains("cable pulled"));
    }

    #[test]
    fn subsystem_errors_convert_into_monitor_error() {
        let persist = MonitorError::from(PersistenceError::io(
            "raw.log",
            io::Error::new(io::ErrorKind::Other, "disk full"),
        ));
        assert!(matches!(persist, MonitorError::Persistence(_)));
        assert!(persist.to_string().contains("raw.log"));

        let start = MonitorError::from(StartError::NoHandler);
        assert!(matches!(start, MonitorError::Start(StartError::NoHandler)));
    }

    #[test]
    fn open_error_messages_name_the_device() {
        let err = OpenError::UnsupportedBaudRate {
            device: "COM3".into(),
            baud_rate: 0,
        };
        assert!(err.to_string().contains("COM3"));
        assert!(err.to_string().contains('0'));
    }
}
