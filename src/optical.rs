//! CRS OptiCal photometer driver
//!
//! Protocol Overview:
//! - Single-byte commands, no terminator
//! - Every command is answered with its data bytes (if any) followed by ACK
//!   (`0x06`); a rejected command is answered with NACK (`0x15`)
//! - `C` calibrate, `I` current (luminance) mode, `V` voltage mode
//! - `L` read the ADC: 3 data bytes, little-endian
//! - `0x80 + addr` read one EEPROM byte
//!
//! The EEPROM holds the reference constants that turn raw ADC counts into
//! luminance or voltage. They are read once when the session opens.
//!
//! # Usage
//!
//! ```rust,no_run
//! use crs_devices::config::OptiCalConfig;
//! use crs_devices::optical::OptiCal;
//!
//! let mut optical = OptiCal::open(&OptiCalConfig::default())?;
//! println!("{} cd/m^2", optical.read_luminance()?);
//! # Ok::<(), crs_devices::error::CrsError>(())
//! ```

use crate::config::OptiCalConfig;
use crate::error::{CrsError, CrsResult};
use crate::logging;
use crate::protocol::session::SerialSession;
use crate::transport::{self, Transport};
use std::fmt;
use tracing::{debug, info, warn, Span};

/// Acknowledge byte.
pub const ACK: u8 = 0x06;
/// Negative acknowledge byte.
pub const NACK: u8 = 0x15;

const CALIBRATE: u8 = b'C';
const CURRENT_MODE: u8 = b'I';
const VOLTAGE_MODE: u8 = b'V';
const READ_ADC: u8 = b'L';
const READ_EEPROM: u8 = 0x80;

/// Half of the 20-bit ADC range; the zero point of the converter.
const ADC_OFFSET: f64 = 524_288.0;

/// EEPROM layout: (first address, length in bytes).
mod eeprom {
    pub const PRODUCT_TYPE: (u8, usize) = (0, 2);
    pub const SERIAL_NUMBER: (u8, usize) = (2, 4);
    pub const FIRMWARE: (u8, usize) = (6, 2);
    pub const V_REF: (u8, usize) = (16, 4);
    pub const Z_COUNT: (u8, usize) = (32, 4);
    pub const R_FEED: (u8, usize) = (48, 4);
    pub const R_GAIN: (u8, usize) = (80, 4);
    pub const K_CAL: (u8, usize) = (96, 4);
}

/// Measurement mode of the photometer input stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptiCalMode {
    /// Photodiode current, reported as luminance.
    Current,
    /// Voltage input.
    Voltage,
}

impl OptiCalMode {
    fn command(self) -> u8 {
        match self {
            OptiCalMode::Current => CURRENT_MODE,
            OptiCalMode::Voltage => VOLTAGE_MODE,
        }
    }
}

/// Identity stored in the EEPROM.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptiCalInfo {
    /// Product type code
    pub product_type: u16,
    /// Serial number
    pub serial_number: u32,
    /// Firmware version (e.g. 1.02)
    pub firmware: f64,
}

/// Factory reference constants stored in the EEPROM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceConstants {
    /// Reference voltage in microvolts
    pub v_ref: u32,
    /// ADC count at zero input
    pub z_count: u32,
    /// Feedback resistance in ohms
    pub r_feed: u32,
    /// Voltage gain resistance in kiloohms
    pub r_gain: u32,
    /// Probe calibration in femtoamps per cd/m^2
    pub k_cal: u32,
}

impl ReferenceConstants {
    /// Signed ADC value relative to the zero point.
    pub fn adc_value(&self, raw: u32) -> f64 {
        f64::from(raw) - f64::from(self.z_count) - ADC_OFFSET
    }

    /// Input voltage seen by the converter for a raw reading, in volts.
    fn input_voltage(&self, raw: u32) -> f64 {
        self.adc_value(raw) / ADC_OFFSET * f64::from(self.v_ref) * 1e-6
    }

    /// Luminance in cd/m^2 for a raw current-mode reading. Never negative.
    pub fn luminance(&self, raw: u32) -> f64 {
        let amps_per_candela = f64::from(self.r_feed) * f64::from(self.k_cal) * 1e-15;
        (self.input_voltage(raw) / amps_per_candela).max(0.0)
    }

    /// Voltage in volts for a raw voltage-mode reading.
    pub fn voltage(&self, raw: u32) -> f64 {
        self.input_voltage(raw) / (f64::from(self.r_gain) * 1e-3)
    }
}

/// OptiCal photometer session.
pub struct OptiCal {
    session: SerialSession,
    info: OptiCalInfo,
    constants: ReferenceConstants,
    mode: OptiCalMode,
}

impl OptiCal {
    /// Open the serial port named in `config` and initialise the device.
    pub fn open(config: &OptiCalConfig) -> CrsResult<Self> {
        let transport = transport::open_serial(&config.port_settings())?;
        Self::with_transport(transport, logging::optical_span(&config.port))
    }

    /// Initialise a device over an already opened transport.
    ///
    /// Calibrates, reads identity and reference constants, then selects
    /// current mode.
    pub fn with_transport(transport: Box<dyn Transport>, span: Span) -> CrsResult<Self> {
        let mut session = SerialSession::new(transport, 0, span);
        let _entered = session.span().clone().entered();

        exchange(&mut session, CALIBRATE, 0)?;

        let info = OptiCalInfo {
            product_type: read_eeprom_value(&mut session, eeprom::PRODUCT_TYPE)? as u16,
            serial_number: read_eeprom_value(&mut session, eeprom::SERIAL_NUMBER)?,
            firmware: f64::from(read_eeprom_value(&mut session, eeprom::FIRMWARE)?) / 100.0,
        };
        let constants = ReferenceConstants {
            v_ref: read_eeprom_value(&mut session, eeprom::V_REF)?,
            z_count: read_eeprom_value(&mut session, eeprom::Z_COUNT)?,
            r_feed: read_eeprom_value(&mut session, eeprom::R_FEED)?,
            r_gain: read_eeprom_value(&mut session, eeprom::R_GAIN)?,
            k_cal: read_eeprom_value(&mut session, eeprom::K_CAL)?,
        };

        exchange(&mut session, CURRENT_MODE, 0)?;
        info!(
            serial = info.serial_number,
            firmware = info.firmware,
            "OptiCal ready"
        );

        Ok(Self {
            session,
            info,
            constants,
            mode: OptiCalMode::Current,
        })
    }

    /// Identity read at open.
    pub fn info(&self) -> &OptiCalInfo {
        &self.info
    }

    /// Reference constants read at open.
    pub fn constants(&self) -> &ReferenceConstants {
        &self.constants
    }

    /// Current input mode.
    pub fn mode(&self) -> OptiCalMode {
        self.mode
    }

    /// Run the device's internal offset calibration.
    pub fn calibrate(&mut self) -> CrsResult<()> {
        let _entered = self.session.span().clone().entered();
        exchange(&mut self.session, CALIBRATE, 0).map(|_| ())
    }

    /// Switch the input stage, if it is not already in `mode`.
    pub fn set_mode(&mut self, mode: OptiCalMode) -> CrsResult<()> {
        if self.mode == mode {
            return Ok(());
        }
        let _entered = self.session.span().clone().entered();
        exchange(&mut self.session, mode.command(), 0)?;
        debug!(?mode, "OptiCal mode changed");
        self.mode = mode;
        Ok(())
    }

    /// Read one EEPROM byte.
    pub fn read_eeprom(&mut self, address: u8) -> CrsResult<u8> {
        let _entered = self.session.span().clone().entered();
        read_eeprom_byte(&mut self.session, address)
    }

    /// Raw 24-bit ADC reading.
    pub fn read_adc(&mut self) -> CrsResult<u32> {
        let _entered = self.session.span().clone().entered();
        let data = exchange(&mut self.session, READ_ADC, 3)?;
        Ok(little_endian(&data))
    }

    /// Luminance in cd/m^2, switching to current mode if needed.
    pub fn read_luminance(&mut self) -> CrsResult<f64> {
        self.set_mode(OptiCalMode::Current)?;
        let raw = self.read_adc()?;
        Ok(self.constants.luminance(raw))
    }

    /// Input voltage in volts, switching to voltage mode if needed.
    pub fn read_voltage(&mut self) -> CrsResult<f64> {
        self.set_mode(OptiCalMode::Voltage)?;
        let raw = self.read_adc()?;
        Ok(self.constants.voltage(raw))
    }

    /// Close the port. Later reads fail with `NotConnected`.
    pub fn close(&mut self) {
        self.session.close();
    }
}

impl fmt::Debug for OptiCal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptiCal")
            .field("info", &self.info)
            .field("mode", &self.mode)
            .field("open", &self.session.is_open())
            .finish()
    }
}

fn command_name(command: u8) -> String {
    if command >= READ_EEPROM {
        format!("EEPROM[{}]", command - READ_EEPROM)
    } else {
        char::from(command).to_string()
    }
}

/// Send one command byte and return the `data_len` data bytes before the ACK.
fn exchange(session: &mut SerialSession, command: u8, data_len: usize) -> CrsResult<Vec<u8>> {
    let transport = session.transport_mut()?;

    // Bytes already waiting are a late reply to an earlier command.
    let waiting = transport.bytes_waiting()?;
    if waiting > 0 {
        let stale = transport.read(waiting)?;
        warn!(
            command = %command_name(command),
            stale = ?stale,
            "Discarding unread OptiCal bytes"
        );
    }

    transport.write(&[command])?;
    transport.flush()?;
    let mut reply = transport.read(data_len + 1)?;

    match reply.last() {
        None => Err(CrsError::Timeout {
            command: command_name(command),
        }),
        Some(&NACK) => {
            warn!(command = %command_name(command), "OptiCal answered NACK");
            Err(CrsError::DeviceRejection {
                command: command_name(command),
                code: "NACK".into(),
                reason: "command not acknowledged".into(),
            })
        }
        Some(_) if reply.len() < data_len + 1 => Err(CrsError::Decode(format!(
            "short reply to {}: {} of {} bytes",
            command_name(command),
            reply.len(),
            data_len + 1
        ))),
        Some(&ACK) => {
            reply.truncate(data_len);
            Ok(reply)
        }
        Some(other) => Err(CrsError::Protocol {
            command: command_name(command),
            reply: format!("{other:#04x}"),
        }),
    }
}

fn read_eeprom_byte(session: &mut SerialSession, address: u8) -> CrsResult<u8> {
    if address >= READ_EEPROM {
        return Err(CrsError::Decode(format!(
            "EEPROM address {address} out of range"
        )));
    }
    let data = exchange(session, READ_EEPROM + address, 1)?;
    Ok(data[0])
}

fn read_eeprom_value(session: &mut SerialSession, (start, len): (u8, usize)) -> CrsResult<u32> {
    let bytes = (0..len)
        .map(|offset| read_eeprom_byte(session, start + offset as u8))
        .collect::<CrsResult<Vec<u8>>>()?;
    Ok(little_endian(&bytes))
}

fn little_endian(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .rev()
        .fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte))
}
