//! Byte transports the device protocols run over.
//!
//! The protocol layer only needs a handful of blocking primitives, captured by
//! the [`Transport`] trait. [`SerialTransport`] implements it over a real
//! serial port; [`MockTransport`] replays scripted device replies in memory.

use crate::error::CrsResult;
use std::time::Duration;

pub mod mock;
pub use mock::MockTransport;

#[cfg(feature = "instrument_serial")]
pub mod serial;
#[cfg(feature = "instrument_serial")]
pub use serial::SerialTransport;

/// Blocking byte transport with a per-read timeout.
pub trait Transport: Send {
    /// Read up to `n` bytes, blocking at most the configured timeout.
    ///
    /// A timeout is not an error: the bytes received so far (possibly none)
    /// are returned.
    fn read(&mut self, n: usize) -> CrsResult<Vec<u8>>;

    /// Write all of `bytes`.
    fn write(&mut self, bytes: &[u8]) -> CrsResult<()>;

    /// Flush buffered output to the device.
    fn flush(&mut self) -> CrsResult<()>;

    /// Set the timeout applied to each subsequent read.
    fn set_timeout(&mut self, timeout: Duration) -> CrsResult<()>;

    /// Number of bytes already received and waiting to be read.
    fn bytes_waiting(&mut self) -> CrsResult<usize>;

    /// Short description for log messages.
    fn describe(&self) -> String {
        "transport".to_string()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read(&mut self, n: usize) -> CrsResult<Vec<u8>> {
        (**self).read(n)
    }

    fn write(&mut self, bytes: &[u8]) -> CrsResult<()> {
        (**self).write(bytes)
    }

    fn flush(&mut self) -> CrsResult<()> {
        (**self).flush()
    }

    fn set_timeout(&mut self, timeout: Duration) -> CrsResult<()> {
        (**self).set_timeout(timeout)
    }

    fn bytes_waiting(&mut self) -> CrsResult<usize> {
        (**self).bytes_waiting()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Port parameters used when opening a serial transport.
#[derive(Debug, Clone, PartialEq)]
pub struct PortSettings {
    /// Port path (e.g. "/dev/ttyACM0", "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Initial per-read timeout
    pub timeout: Duration,
}

impl PortSettings {
    /// Create port settings with the given path, baud rate and timeout.
    pub fn new(port: impl Into<String>, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            timeout,
        }
    }
}

/// Open a serial transport for `settings`.
///
/// Fails with `FeatureNotEnabled` when the crate is built without
/// `instrument_serial`.
pub fn open_serial(settings: &PortSettings) -> CrsResult<Box<dyn Transport>> {
    #[cfg(feature = "instrument_serial")]
    {
        Ok(Box::new(SerialTransport::open(settings)?))
    }

    #[cfg(not(feature = "instrument_serial"))]
    {
        let _ = settings;
        Err(crate::error::CrsError::FeatureNotEnabled(
            "instrument_serial".to_string(),
        ))
    }
}
