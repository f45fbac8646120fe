//! Custom error types for the drivers.
//!
//! `CrsError` is the single error type returned by every fallible operation in
//! this crate. The variants follow the failure kinds a caller needs to tell
//! apart when deciding between retrying and giving up:
//!
//! - **`Transport`**: the serial port could not be acquired. Fatal for the
//!   session being constructed; `ColorCal::open` records it instead of raising
//!   it so callers can probe for a device without handling an error.
//! - **`Timeout`**: the device produced no reply within the attempt budget.
//!   Recoverable; the caller may retry or treat it as "no data".
//! - **`Protocol`**: a reply arrived but did not carry the success sentinel.
//! - **`DeviceRejection`**: the device answered with a known error code (for
//!   example `ER11` during zero calibration, or an OptiCal NACK).
//! - **`LightLeak`**: a zero calibration was acknowledged but the confirmation
//!   measurement saw light on the detector.
//! - **`Decode`**: a reply had the wrong number or type of fields.
//! - **`InvalidLut`**: lookup-table input with the wrong shape or range.
//!
//! By using `#[from]`, I/O and configuration errors convert with `?`.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type CrsResult<T> = std::result::Result<T, CrsError>;

/// Errors raised by the ColorCAL, OptiCal and Bits++ drivers.
#[derive(Error, Debug)]
pub enum CrsError {
    /// The transport could not be opened.
    #[error("Couldn't connect to port {port}: {message}")]
    Transport {
        /// Port identifier that failed to open.
        port: String,
        /// Reason reported by the transport layer.
        message: String,
    },

    /// A command was issued on a session without an open transport.
    #[error("Serial port not connected")]
    NotConnected,

    /// No reply was received before the attempt budget ran out.
    #[error("No reply to command '{command}' before timeout")]
    Timeout {
        /// Command that went unanswered.
        command: String,
    },

    /// The reply did not start with the success sentinel.
    #[error("Unexpected reply to command '{command}': {reply}")]
    Protocol {
        /// Command that was sent.
        command: String,
        /// Raw reply line.
        reply: String,
    },

    /// The device rejected a command with a known error code.
    #[error("Device rejected '{command}' with {code}: {reason}")]
    DeviceRejection {
        /// Command that was rejected.
        command: String,
        /// Device error code (e.g. `ER11`, `NACK`).
        code: String,
        /// Human readable explanation of the code.
        reason: String,
    },

    /// Zero calibration confirmed light reaching the detector.
    #[error(
        "There seems to be some light getting to the detector (Y = {luminance}). \
         It should be well-covered for zero calibration"
    )]
    LightLeak {
        /// Luminance measured after the calibration command.
        luminance: f64,
    },

    /// The reply could not be decoded into the expected values.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The operation is not allowed in the session's current state.
    #[error("Cannot {operation} while device is {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// Session state at the time of the call.
        state: String,
    },

    /// Lookup-table values or range were rejected.
    #[error("Invalid LUT: {0}")]
    InvalidLut(String),

    /// I/O failure on an open transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but holds invalid values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Functionality compiled out via feature flags.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl CrsError {
    /// Whether retrying the failed command can reasonably succeed.
    ///
    /// Transport, state and input errors need the caller to change something
    /// first; reply-level failures may clear up on the next exchange.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CrsError::Timeout { .. }
                | CrsError::Protocol { .. }
                | CrsError::DeviceRejection { .. }
                | CrsError::LightLeak { .. }
                | CrsError::Decode(_)
        )
    }
}

impl From<figment::Error> for CrsError {
    fn from(value: figment::Error) -> Self {
        CrsError::Config(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_errors_are_recoverable() {
        let timeout = CrsError::Timeout {
            command: "MES".into(),
        };
        assert!(timeout.is_recoverable());

        let rejection = CrsError::DeviceRejection {
            command: "UZC".into(),
            code: "ER11".into(),
            reason: "not properly covered".into(),
        };
        assert!(rejection.is_recoverable());
    }

    #[test]
    fn transport_errors_are_fatal() {
        let err = CrsError::Transport {
            port: "/dev/ttyACM0".into(),
            message: "No such file or directory".into(),
        };
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("/dev/ttyACM0"));
        assert!(!CrsError::NotConnected.is_recoverable());
    }

    #[test]
    fn light_leak_message_explains_cause() {
        let err = CrsError::LightLeak { luminance: 12.5 };
        let msg = err.to_string();
        assert!(msg.contains("light getting to the detector"));
        assert!(msg.contains("12.5"));
    }
}
