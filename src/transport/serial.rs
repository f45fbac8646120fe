//! Serial transport for USB-serial devices
//!
//! Wraps the serialport crate. Reads honour the port timeout one call at a
//! time, so a timed-out read returns the bytes received so far instead of an
//! error.

use super::{PortSettings, Transport};
use crate::error::{CrsError, CrsResult};
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::debug;

/// Transport over an open serial port.
pub struct SerialTransport {
    /// Port name (e.g., "/dev/ttyACM0", "COM3")
    port_name: String,

    /// Baud rate
    baud_rate: u32,

    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open the port described by `settings`.
    ///
    /// # Errors
    /// Returns `CrsError::Transport` if the port cannot be opened (missing
    /// device, permissions, or the port is held by another program).
    pub fn open(settings: &PortSettings) -> CrsResult<Self> {
        let port = serialport::new(&settings.port, settings.baud_rate)
            .timeout(settings.timeout)
            .open()
            .map_err(|e| CrsError::Transport {
                port: settings.port.clone(),
                message: e.to_string(),
            })?;

        debug!(
            port = %settings.port,
            baud_rate = settings.baud_rate,
            "Serial port opened"
        );

        Ok(Self {
            port_name: settings.port.clone(),
            baud_rate: settings.baud_rate,
            port,
        })
    }

    /// Port name this transport was opened on.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, n: usize) -> CrsResult<Vec<u8>> {
        let mut buffer = vec![0u8; n];
        let mut filled = 0;

        while filled < n {
            match self.port.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(count) => filled += count,
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        buffer.truncate(filled);
        Ok(buffer)
    }

    fn write(&mut self, bytes: &[u8]) -> CrsResult<()> {
        self.port.write_all(bytes)?;
        Ok(())
    }

    fn flush(&mut self) -> CrsResult<()> {
        self.port.flush()?;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> CrsResult<()> {
        self.port
            .set_timeout(timeout)
            .map_err(|e| CrsError::Io(e.into()))
    }

    fn bytes_waiting(&mut self) -> CrsResult<usize> {
        let waiting = self
            .port
            .bytes_to_read()
            .map_err(|e| CrsError::Io(e.into()))?;
        Ok(waiting as usize)
    }

    fn describe(&self) -> String {
        format!("SerialTransport({} @ {} baud)", self.port_name, self.baud_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_missing_port_reports_transport_error() {
        let settings = PortSettings::new(
            "/dev/crs-devices-no-such-port",
            115_200,
            Duration::from_millis(100),
        );

        match SerialTransport::open(&settings) {
            Err(CrsError::Transport { port, .. }) => {
                assert_eq!(port, "/dev/crs-devices-no-such-port");
            }
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("opening a nonexistent port should fail"),
        }
    }
}
