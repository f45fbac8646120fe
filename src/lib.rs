//! # CRS Devices
//!
//! Drivers for Cambridge Research Systems vision-science hardware.
//!
//! ## Crate Structure
//!
//! - **`transport`**: The `Transport` trait the protocols run over, with a
//!   `serialport` implementation and an in-memory mock.
//! - **`protocol`**: The line-based command/reply session, byte reader and
//!   reply parser shared by the serial drivers.
//! - **`colorcal`**: The ColorCAL colorimeter: identity and calibration
//!   matrix probe, zero calibration, XYZ measurements.
//! - **`optical`**: The OptiCal photometer: ACK/NACK byte protocol and
//!   EEPROM reference constants.
//! - **`bits`**: The Bits++ display box: 16-bit LUT encoding and the Mono++ and
//!   Color++ pixel packing.
//! - **`config`**: `figment`-based configuration for all devices.
//! - **`logging`**: `tracing-subscriber` setup and per-session spans.
//! - **`error`**: The `CrsError` enum shared by every module.
//!
//! ## Feature Flags
//!
//! - `instrument_serial` (default): real serial ports through `serialport`.
//!   Without it only the mock transport is available.

pub mod bits;
pub mod colorcal;
pub mod config;
pub mod error;
pub mod logging;
pub mod optical;
pub mod protocol;
pub mod transport;

pub use colorcal::ColorCal;
pub use error::{CrsError, CrsResult};
pub use optical::OptiCal;
