//! CRS ColorCAL colorimeter driver
//!
//! Protocol Overview:
//! - ASCII commands terminated by `\n`
//! - Replies terminated by `\n\r` (reversed from the usual CRLF), followed by
//!   a bare `>` prompt once the device is ready for the next command
//! - Status `OK00` on success, `ERnn` on error (`ER11`: detector not covered
//!   during zero calibration)
//! - Commands: `IDR` identity, `r01`..`r03` calibration matrix rows (vendor
//!   fixed-point), `MES` measurement (`OK00,X,Y,Z`), `UZC` zero calibration,
//!   `?` help text
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected -> Opening -> Probing -> Ready
//!                    |          |
//!                    +-> Failed <-+   (probe() may be retried while the port is open)
//! ```
//!
//! Constructing a [`ColorCal`] never returns an error: a port that cannot be
//! opened leaves the driver in [`SessionState::Failed`] with `is_ok() == false`
//! so callers can test for a device without handling errors.
//!
//! # Usage
//!
//! ```rust,no_run
//! use crs_devices::colorcal::ColorCal;
//! use crs_devices::config::ColorCalConfig;
//!
//! let mut cal = ColorCal::open(ColorCalConfig::for_port("/dev/ttyACM0"));
//! if cal.is_ok() {
//!     if cal.needs_calibrate_zero() {
//!         cal.calibrate_zero()?;
//!     }
//!     let reading = cal.measure()?;
//!     println!("Y = {} cd/m^2", reading.y);
//! }
//! # Ok::<(), crs_devices::error::CrsError>(())
//! ```

use crate::config::ColorCalConfig;
use crate::error::{CrsError, CrsResult};
use crate::logging;
use crate::protocol::parser::{self, ReplyLine, Status};
use crate::protocol::session::{LineFraming, Reply, SerialSession};
use crate::transport::{self, PortSettings, Transport};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn, Span};

/// Error code returned by `UZC` when light reaches the detector.
const NOT_COVERED: &str = "ER11";

/// Lifecycle state of a ColorCAL session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport held.
    Disconnected,
    /// Acquiring the transport.
    Opening,
    /// Querying identity and calibration matrix.
    Probing,
    /// Identity and calibration matrix retrieved.
    Ready,
    /// Opening or probing failed.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Opening => "opening",
            SessionState::Probing => "probing",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Identity reported by `IDR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Serial number
    pub serial_number: String,
    /// Firmware version
    pub firmware: String,
    /// Firmware build as reported
    pub firmware_build: String,
}

impl DeviceInfo {
    /// Parse an `IDR` reply line (`OK00,<name>,<firmware>,<x>,<serial>,...,<build>`).
    pub fn from_reply(reply: &ReplyLine) -> CrsResult<Self> {
        let fields = reply.fields();
        if fields.len() < 4 {
            return Err(CrsError::Decode(format!(
                "identity reply '{}' has {} fields, expected at least 4",
                reply.raw(),
                fields.len()
            )));
        }

        Ok(Self {
            firmware: fields[1].trim().to_string(),
            serial_number: fields[3].trim().to_string(),
            firmware_build: fields[fields.len() - 1].trim().to_string(),
        })
    }

    /// Firmware build as a number, from its leading digits.
    pub fn build_number(&self) -> Option<u32> {
        let digits: String = self
            .firmware_build
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        digits.parse().ok()
    }
}

/// Device-specific 3x3 transform from raw sensor values to CIE XYZ.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationMatrix {
    rows: [[f64; 3]; 3],
}

impl CalibrationMatrix {
    /// Matrix from its rows.
    pub fn new(rows: [[f64; 3]; 3]) -> Self {
        Self { rows }
    }

    /// Identity transform.
    pub fn identity() -> Self {
        Self::new([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
    }

    /// Matrix rows.
    pub fn rows(&self) -> &[[f64; 3]; 3] {
        &self.rows
    }

    /// Multiply a raw reading by the matrix.
    pub fn apply(&self, raw: [f64; 3]) -> [f64; 3] {
        self.rows
            .map(|row| row.iter().zip(raw.iter()).map(|(m, v)| m * v).sum::<f64>())
    }
}

/// One colorimeter reading, CIE XYZ with Y in cd/m^2.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// CIE X
    pub x: f64,
    /// CIE Y (luminance)
    pub y: f64,
    /// CIE Z
    pub z: f64,
}

/// Features that differ between ColorCAL firmware generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Whether the firmware build decides if zero calibration is needed.
    /// Devices without it are assumed to hold a factory dark calibration.
    pub supports_zero_calibration_query: bool,
    /// Builds below this number keep their zero calibration in volatile memory.
    pub zero_calibration_build: u32,
}

impl From<&ColorCalConfig> for Capabilities {
    fn from(config: &ColorCalConfig) -> Self {
        Self {
            supports_zero_calibration_query: config.supports_zero_calibration_query,
            zero_calibration_build: config.zero_calibration_build,
        }
    }
}

/// ColorCAL colorimeter session.
pub struct ColorCal {
    config: ColorCalConfig,
    capabilities: Capabilities,
    session: Option<SerialSession>,
    state: SessionState,
    zero_calibrated: bool,
    info: Option<DeviceInfo>,
    calibration: Option<CalibrationMatrix>,
    last_luminance: Option<f64>,
    failure: Option<String>,
    span: Span,
}

impl ColorCal {
    /// Open the serial port named in `config` and probe the device.
    ///
    /// Never fails; check [`ColorCal::is_ok`] and [`ColorCal::failure`].
    pub fn open(config: ColorCalConfig) -> Self {
        let span = logging::colorcal_span(&config.port);
        Self::connect(config, span, transport::open_serial)
    }

    /// Probe a device over an already opened transport.
    pub fn with_transport(config: ColorCalConfig, transport: Box<dyn Transport>) -> Self {
        let span = logging::colorcal_span(&config.port);
        Self::connect(config, span, move |_| Ok(transport))
    }

    /// Open a transport with `opener`, then probe the device.
    ///
    /// `span` receives every log event of this session.
    pub fn connect<F>(config: ColorCalConfig, span: Span, opener: F) -> Self
    where
        F: FnOnce(&PortSettings) -> CrsResult<Box<dyn Transport>>,
    {
        let mut cal = Self {
            capabilities: Capabilities::from(&config),
            config,
            session: None,
            state: SessionState::Opening,
            zero_calibrated: false,
            info: None,
            calibration: None,
            last_luminance: None,
            failure: None,
            span,
        };

        let _entered = cal.span.clone().entered();
        match opener(&cal.config.port_settings()) {
            Ok(transport) => {
                let session = SerialSession::new(transport, cal.config.max_attempts, cal.span.clone())
                    .with_framing(LineFraming::colorcal());
                cal.session = Some(session);
                // A failed probe is recorded in `failure`; the port stays open.
                let _ = cal.probe();
            }
            Err(e) => {
                error!(
                    "Couldn't connect to port {}. Is it being used by another program? ({e})",
                    cal.config.port
                );
                cal.fail(e.to_string());
            }
        }
        cal
    }

    /// Query identity and calibration matrix; enter `Ready` on success.
    ///
    /// May be retried after a failed probe as long as the port is open.
    pub fn probe(&mut self) -> CrsResult<()> {
        let _entered = self.span.clone().entered();
        if self.session.as_ref().map_or(true, |s| !s.is_open()) {
            return Err(self.invalid_state("probe"));
        }

        self.state = SessionState::Probing;
        let result = self.read_info().and_then(|info| {
            let matrix = self.read_calibration_matrix()?;
            Ok((info, matrix))
        });

        match result {
            Ok((info, matrix)) => {
                info!(
                    serial = %info.serial_number,
                    firmware = %info.firmware,
                    build = %info.firmware_build,
                    "ColorCAL ready"
                );
                self.info = Some(info);
                self.calibration = Some(matrix);
                self.failure = None;
                self.state = SessionState::Ready;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "ColorCAL probe failed");
                self.fail(e.to_string());
                Err(e)
            }
        }
    }

    /// Conduct a measurement, transformed by the calibration matrix.
    ///
    /// A measurement can come back empty on the first request; it is retried
    /// once before reporting a timeout. The luminance is kept as
    /// [`ColorCal::last_luminance`].
    pub fn measure(&mut self) -> CrsResult<Measurement> {
        let _entered = self.span.clone().entered();
        self.require_ready("measure")?;
        let timeout = self.config.measure_timeout();

        let mut reply = self.send("MES", timeout)?;
        if reply.is_empty() {
            debug!("Empty reply to MES, retrying once");
            reply = self.send("MES", timeout)?;
        }
        let line = single_line("MES", reply)?;

        let raw = parser::parse(&line).ensure_ok("MES")?.numeric_fields::<f64>(3)?;
        let matrix = self.calibration.unwrap_or_else(CalibrationMatrix::identity);
        let [x, y, z] = matrix.apply([raw[0], raw[1], raw[2]]);

        self.last_luminance = Some(y);
        Ok(Measurement { x, y, z })
    }

    /// Conduct a measurement and return only the luminance (Y).
    pub fn luminance(&mut self) -> CrsResult<f64> {
        self.measure().map(|m| m.y)
    }

    /// Whether this device needs a dark calibration before measuring.
    ///
    /// Early ColorCAL mkII firmware kept its zero calibration in volatile
    /// memory, so it had to be recalibrated after every connection.
    pub fn needs_calibrate_zero(&self) -> bool {
        if !self.capabilities.supports_zero_calibration_query || self.zero_calibrated {
            return false;
        }
        match self.info.as_ref().and_then(DeviceInfo::build_number) {
            Some(build) => build < self.capabilities.zero_calibration_build,
            None => true,
        }
    }

    /// Perform a calibration to zero light.
    ///
    /// The sensor must be covered. After the device acknowledges, a
    /// confirmation measurement must read at most `zero_tolerance`.
    ///
    /// # Errors
    /// - `DeviceRejection` with code `ER11` if the device reports light
    /// - `LightLeak` if the confirmation measurement is too bright
    /// - `Timeout` if the device does not answer
    pub fn calibrate_zero(&mut self) -> CrsResult<()> {
        let _entered = self.span.clone().entered();
        self.require_ready("calibrate zero")?;

        let reply = self.send("UZC", self.config.calibration_timeout())?;
        let line = parser::parse(&single_line("UZC", reply)?);
        match line.status() {
            Status::Ok => {}
            Status::Error(code) if code == NOT_COVERED => {
                error!("Could not calibrate ColorCAL. Is it properly covered?");
                return Err(CrsError::DeviceRejection {
                    command: "UZC".into(),
                    code: code.clone(),
                    reason: "sensor is not properly covered".into(),
                });
            }
            _ => {
                warn!(reply = %line.raw(), "Received surprising result from ColorCAL");
                return Err(CrsError::Protocol {
                    command: "UZC".into(),
                    reply: line.raw().to_string(),
                });
            }
        }

        let check = self.measure()?;
        if check.y > self.config.zero_tolerance {
            error!(
                luminance = check.y,
                "There seems to be some light getting to the detector"
            );
            return Err(CrsError::LightLeak { luminance: check.y });
        }

        self.zero_calibrated = true;
        info!("ColorCAL zero calibration complete");
        Ok(())
    }

    /// Re-read the calibration matrix from the device.
    pub fn refresh_calibration_matrix(&mut self) -> CrsResult<CalibrationMatrix> {
        let _entered = self.span.clone().entered();
        self.require_ready("read calibration matrix")?;
        let matrix = self.read_calibration_matrix()?;
        self.calibration = Some(matrix);
        Ok(matrix)
    }

    /// Help text listing the device commands.
    pub fn help(&mut self) -> CrsResult<Vec<String>> {
        let _entered = self.span.clone().entered();
        self.require_ready("read help")?;
        let timeout = self.config.calibration_timeout();
        Ok(self.send("?", timeout)?.into_lines())
    }

    /// Close the port. The driver returns to `Disconnected`.
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        self.state = SessionState::Disconnected;
        self.zero_calibrated = false;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the device is ready for measurements.
    pub fn is_ok(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Why opening or probing failed, if it did.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Identity read during the last successful probe.
    pub fn info(&self) -> Option<&DeviceInfo> {
        self.info.as_ref()
    }

    /// Calibration matrix read during the last successful probe.
    pub fn calibration_matrix(&self) -> Option<&CalibrationMatrix> {
        self.calibration.as_ref()
    }

    /// Luminance of the most recent measurement.
    pub fn last_luminance(&self) -> Option<f64> {
        self.last_luminance
    }

    /// Whether a zero calibration succeeded on this connection.
    pub fn is_zero_calibrated(&self) -> bool {
        self.zero_calibrated
    }

    /// Feature flags of this driver.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Port this session was opened on.
    pub fn port(&self) -> &str {
        &self.config.port
    }

    fn read_info(&mut self) -> CrsResult<DeviceInfo> {
        let timeout = self.config.timeout();
        let reply = self.send("IDR", timeout)?;
        let line = parser::parse(&single_line("IDR", reply)?).ensure_ok("IDR")?;
        DeviceInfo::from_reply(&line)
    }

    fn read_calibration_matrix(&mut self) -> CrsResult<CalibrationMatrix> {
        let timeout = self.config.calibration_timeout();
        let mut rows = [[0.0; 3]; 3];

        for (index, row) in rows.iter_mut().enumerate() {
            let command = format!("r0{}", index + 1);
            let reply = self.send(&command, timeout)?;
            let line = parser::parse(&single_line(&command, reply)?).ensure_ok(&command)?;
            let raw = line.numeric_fields::<u32>(3)?;
            let decoded = parser::decode_fixed_point_all(&raw);
            row.copy_from_slice(&decoded);
        }

        Ok(CalibrationMatrix::new(rows))
    }

    fn send(&mut self, command: &str, timeout: Duration) -> CrsResult<Reply> {
        let session = self.session.as_mut().ok_or(CrsError::NotConnected)?;
        let result = session.send_command(command, timeout);
        if !session.is_open() {
            let reason = match &result {
                Err(e) => format!("Sending '{}' failed: {e}", command.trim_end()),
                Ok(_) => format!("Session closed while sending '{}'", command.trim_end()),
            };
            self.fail(reason);
        }
        result
    }

    fn require_ready(&self, operation: &'static str) -> CrsResult<()> {
        if self.state == SessionState::Ready {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    fn invalid_state(&self, operation: &'static str) -> CrsError {
        CrsError::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }

    fn fail(&mut self, reason: String) {
        self.state = SessionState::Failed;
        self.failure = Some(reason);
    }
}

impl fmt::Debug for ColorCal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColorCal")
            .field("port", &self.config.port)
            .field("state", &self.state)
            .field("zero_calibrated", &self.zero_calibrated)
            .field("info", &self.info)
            .finish()
    }
}

fn single_line(command: &str, reply: Reply) -> CrsResult<String> {
    match reply {
        Reply::Line(line) => Ok(line),
        Reply::Empty => Err(CrsError::Timeout {
            command: command.to_string(),
        }),
        Reply::Lines(lines) => Err(CrsError::Decode(format!(
            "expected one line in reply to '{command}', got {}",
            lines.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn reply(line: &str) -> String {
        format!("{line}\n\r>")
    }

    fn queue_probe(mock: &MockTransport, build: &str) {
        mock.queue_reply(reply(&format!("OK00,CCAL2,1.06,MKII,10042,{build}")));
        mock.queue_reply(reply("OK00,10000,0,0"));
        mock.queue_reply(reply("OK00,0,10000,0"));
        mock.queue_reply(reply("OK00,0,0,10000"));
    }

    fn ready(build: &str) -> (ColorCal, MockTransport) {
        let mock = MockTransport::new();
        queue_probe(&mock, build);
        let cal = ColorCal::with_transport(ColorCalConfig::for_port("mock"), Box::new(mock.clone()));
        assert!(cal.is_ok(), "probe failed: {:?}", cal.failure());
        (cal, mock)
    }

    #[test]
    fn unreachable_port_is_not_ok() {
        let mut cal = ColorCal::connect(ColorCalConfig::for_port("/dev/missing"), Span::none(), |s| {
            Err(CrsError::Transport {
                port: s.port.clone(),
                message: "no such device".into(),
            })
        });

        assert!(!cal.is_ok());
        assert_eq!(cal.state(), SessionState::Failed);
        assert!(cal.failure().unwrap_or_default().contains("/dev/missing"));
        assert!(matches!(cal.measure(), Err(CrsError::InvalidState { .. })));
        assert!(matches!(cal.probe(), Err(CrsError::InvalidState { .. })));
    }

    #[test]
    fn device_info_fields() {
        let line = parser::parse("OK00,CCAL2,1.06,MKII,10042,906");
        let info = DeviceInfo::from_reply(&line).unwrap();
        assert_eq!(info.firmware, "1.06");
        assert_eq!(info.serial_number, "10042");
        assert_eq!(info.firmware_build, "906");
        assert_eq!(info.build_number(), Some(906));
    }

    #[test]
    fn device_info_rejects_short_reply() {
        let line = parser::parse("OK00,CCAL2");
        assert!(matches!(
            DeviceInfo::from_reply(&line),
            Err(CrsError::Decode(_))
        ));
    }

    #[test]
    fn matrix_apply() {
        let matrix = CalibrationMatrix::new([[1.0, 2.0, 0.0], [0.0, 1.0, 0.0], [0.5, 0.0, 2.0]]);
        assert_eq!(matrix.apply([1.0, 2.0, 3.0]), [5.0, 2.0, 6.5]);
        assert_eq!(CalibrationMatrix::identity().apply([1.0, 2.0, 3.0]), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn build_comparison_is_numeric() {
        // "1000" < "877" as strings; numerically it is a newer build.
        let (cal, _) = ready("1000");
        assert!(!cal.needs_calibrate_zero());

        let (cal, _) = ready("876");
        assert!(cal.needs_calibrate_zero());

        let (cal, _) = ready("877");
        assert!(!cal.needs_calibrate_zero());
    }

    #[test]
    fn capability_flag_disables_zero_query() {
        let mock = MockTransport::new();
        queue_probe(&mock, "100");
        let config = ColorCalConfig {
            supports_zero_calibration_query: false,
            ..ColorCalConfig::for_port("mock")
        };
        let cal = ColorCal::with_transport(config, Box::new(mock));
        assert!(cal.is_ok());
        assert!(!cal.needs_calibrate_zero());
    }

    #[test]
    fn measure_applies_matrix() {
        let mock = MockTransport::new();
        mock.queue_reply(reply("OK00,CCAL2,1.06,MKII,10042,906"));
        mock.queue_reply(reply("OK00,20000,0,0"));
        mock.queue_reply(reply("OK00,0,10000,0"));
        mock.queue_reply(reply("OK00,0,0,50500"));
        mock.queue_reply(reply("OK00,1.5,40.0,2.0"));
        let mut cal = ColorCal::with_transport(ColorCalConfig::for_port("mock"), Box::new(mock));

        let m = cal.measure().unwrap();
        assert_eq!(m.x, 3.0);
        assert_eq!(m.y, 40.0);
        assert!((m.z - -0.1).abs() < 1e-12);
        assert_eq!(cal.last_luminance(), Some(40.0));
    }

    #[test]
    fn measure_retries_once_on_empty_reply() {
        let (mut cal, mock) = ready("906");
        mock.queue_reply(b"");
        mock.queue_reply(reply("OK00,1.0,2.0,3.0"));

        let m = cal.measure().unwrap();
        assert_eq!(m.y, 2.0);
        let sent = mock.written_commands();
        assert_eq!(&sent[sent.len() - 2..], &["MES\n", "MES\n"]);
    }

    #[test]
    fn measure_times_out_after_retry() {
        let (mut cal, mock) = ready("906");
        assert!(matches!(cal.measure(), Err(CrsError::Timeout { .. })));
        assert_eq!(mock.written_commands().len(), 6);
    }

    #[test]
    fn calibrate_zero_not_covered() {
        let (mut cal, mock) = ready("800");
        mock.queue_reply(reply("ER11"));

        match cal.calibrate_zero() {
            Err(CrsError::DeviceRejection { code, reason, .. }) => {
                assert_eq!(code, "ER11");
                assert!(reason.contains("covered"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!cal.is_zero_calibrated());
        assert!(cal.needs_calibrate_zero());
    }

    #[test]
    fn calibrate_zero_rejects_bright_confirmation() {
        let (mut cal, mock) = ready("800");
        mock.queue_reply(reply("OK00"));
        mock.queue_reply(reply("OK00,0.1,3.2,0.1"));

        match cal.calibrate_zero() {
            Err(CrsError::LightLeak { luminance }) => assert_eq!(luminance, 3.2),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!cal.is_zero_calibrated());
    }

    #[test]
    fn calibrate_zero_success() {
        let (mut cal, mock) = ready("800");
        mock.queue_reply(reply("OK00"));
        mock.queue_reply(reply("OK00,0.0,0.02,0.0"));

        cal.calibrate_zero().unwrap();
        assert!(cal.is_zero_calibrated());
        assert!(!cal.needs_calibrate_zero());
    }

    #[test]
    fn calibrate_zero_surprising_reply() {
        let (mut cal, mock) = ready("800");
        mock.queue_reply(reply("ER02"));
        assert!(matches!(
            cal.calibrate_zero(),
            Err(CrsError::Protocol { .. })
        ));
    }

    #[test]
    fn operations_gated_by_state() {
        let mock = MockTransport::new();
        mock.queue_reply(reply("ER01"));
        let mut cal = ColorCal::with_transport(ColorCalConfig::for_port("mock"), Box::new(mock.clone()));

        assert_eq!(cal.state(), SessionState::Failed);
        assert!(matches!(
            cal.measure(),
            Err(CrsError::InvalidState { .. })
        ));
        assert_eq!(mock.written_commands(), vec!["IDR\n"]);
    }

    #[test]
    fn close_returns_to_disconnected() {
        let (mut cal, _) = ready("906");
        cal.close();
        assert_eq!(cal.state(), SessionState::Disconnected);
        assert!(matches!(cal.probe(), Err(CrsError::InvalidState { .. })));
    }
}
