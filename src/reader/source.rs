//! Byte-stream sources the frame reader can own.

use crate::error::OpenError;
use std::io;
use std::time::Duration;

/// A blocking byte stream with a bounded read wait.
///
/// `read` follows `std::io::Read` with two conventions the reader relies on:
/// - `Err` of kind `TimedOut`, `WouldBlock` or `Interrupted` means "no data yet";
///   the reader checks its stop token and reads again.
/// - `Ok(0)` means the stream has ended.
pub trait ByteSource: Send {
    /// Read whatever bytes are available, waiting at most the source's timeout.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Device identifier, for logs and errors.
    fn name(&self) -> &str;
}

/// Whether `err` only means the read timed out.
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Serial port source backed by the `serialport` crate.
#[cfg(feature = "instrument_serial")]
pub struct SerialSource {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,
    port: Box<dyn serialport::SerialPort>,
}

#[cfg(feature = "instrument_serial")]
impl SerialSource {
    /// Open `port_name` at `baud_rate`, 8N1, no flow control.
    ///
    /// `timeout` bounds each read so that a stop request is noticed promptly
    /// on a silent line.
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> Result<Self, OpenError> {
        if baud_rate == 0 {
            return Err(OpenError::UnsupportedBaudRate {
                device: port_name.to_string(),
                baud_rate,
            });
        }

        let port = serialport::new(port_name, baud_rate)
            .timeout(timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| map_open_error(port_name, baud_rate, e))?;

        tracing::debug!(device = port_name, baud_rate, "Serial port opened");

        Ok(Self {
            port_name: port_name.to_string(),
            port,
        })
    }
}

#[cfg(feature = "instrument_serial")]
impl ByteSource for SerialSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut self.port, buf)
    }

    fn name(&self) -> &str {
        &self.port_name
    }
}

#[cfg(feature = "instrument_serial")]
fn map_open_error(device: &str, baud_rate: u32, err: serialport::Error) -> OpenError {
    use serialport::ErrorKind;

    let device = device.to_string();
    let busy = err.description.to_lowercase().contains("busy");
    match err.kind {
        _ if busy => OpenError::DeviceBusy { device },
        ErrorKind::NoDevice => OpenError::DeviceNotFound {
            device,
            message: err.description,
        },
        ErrorKind::InvalidInput => OpenError::UnsupportedBaudRate { device, baud_rate },
        ErrorKind::Io(io::ErrorKind::NotFound) => OpenError::DeviceNotFound {
            device,
            message: err.description,
        },
        ErrorKind::Io(io::ErrorKind::PermissionDenied) => OpenError::PermissionDenied { device },
        ErrorKind::Io(kind) => OpenError::Io {
            device,
            source: io::Error::new(kind, err.description),
        },
        ErrorKind::Unknown => OpenError::Io {
            device,
            source: io::Error::new(io::ErrorKind::Other, err.description),
        },
    }
}

/// Stand-in used when the serial transport is compiled out. Never constructed.
#[cfg(not(feature = "instrument_serial"))]
pub enum SerialSource {}

#[cfg(not(feature = "instrument_serial"))]
impl SerialSource {
    /// Always fails: serial support is disabled.
    pub fn open(_port_name: &str, _baud_rate: u32, _timeout: Duration) -> Result<Self, OpenError> {
        Err(OpenError::SerialFeatureDisabled)
    }
}

#[cfg(not(feature = "instrument_serial"))]
impl ByteSource for SerialSource {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        match *self {}
    }

    fn name(&self) -> &str {
        match *self {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_transient() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::BrokenPipe)));
    }

    #[cfg(feature = "instrument_serial")]
    #[test]
    fn missing_device_fails_to_open() {
        let result = SerialSource::open(
            "/dev/thermolog-does-not-exist",
            9600,
            Duration::from_millis(100),
        );
        assert!(result.is_err());
    }

    #[cfg(feature = "instrument_serial")]
    #[test]
    fn zero_baud_is_rejected_before_touching_the_device() {
        let result = SerialSource::open("/dev/ttyS0", 0, Duration::from_millis(100));
        assert!(matches!(
            result,
            Err(OpenError::UnsupportedBaudRate { baud_rate: 0, .. })
        ));
    }

    #[cfg(feature = "instrument_serial")]
    #[test]
    fn no_device_maps_to_not_found() {
        let err = serialport::Error::new(serialport::ErrorKind::NoDevice, "no such device");
        assert!(matches!(
            map_open_error("COM9", 9600, err),
            OpenError::DeviceNotFound { .. }
        ));
    }

    #[cfg(feature = "instrument_serial")]
    #[test]
    fn permission_denied_is_distinguished() {
        let err = serialport::Error::new(
            serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied),
            "denied",
        );
        assert!(matches!(
            map_open_error("/dev/ttyS0", 9600, err),
            OpenError::PermissionDenied { .. }
        ));
    }
}
