//! Configuration loading using Figment
//!
//! Every driver takes its parameters as plain constructor arguments; this
//! module only bundles them so an application can keep them in one file.
//! Configuration is merged from:
//! 1. built-in defaults
//! 2. a TOML file
//! 3. environment variables prefixed with `CRS_`, nested with `__`
//!    (e.g. `CRS_COLORCAL__PORT=/dev/ttyACM1`)
//!
//! # Example
//! ```no_run
//! use crs_devices::config::CrsConfig;
//!
//! let config = CrsConfig::load_from("config/crs.toml")?;
//! config.validate()?;
//! println!("ColorCAL on {}", config.colorcal.port);
//! # Ok::<(), crs_devices::error::CrsError>(())
//! ```

use crate::error::{CrsError, CrsResult};
use crate::transport::PortSettings;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrsConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// ColorCAL colorimeter
    pub colorcal: ColorCalConfig,
    /// OptiCal photometer
    pub optical: OptiCalConfig,
    /// Bits++ display box
    pub bits: BitsConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// ColorCAL session parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorCalConfig {
    /// Serial port path
    pub port: String,
    /// Baud rate (the device accepts any rate over USB)
    pub baud_rate: u32,
    /// Per-byte read timeout for ordinary commands (milliseconds)
    pub timeout_ms: u64,
    /// Timeout for calibration commands (`UZC`, `r01`..`r03`)
    pub calibration_timeout_ms: u64,
    /// Timeout for a measurement (`MES`)
    pub measure_timeout_ms: u64,
    /// Consecutive empty lines tolerated per command
    pub max_attempts: usize,
    /// Largest luminance accepted after a zero calibration
    pub zero_tolerance: f64,
    /// Firmware builds below this number need a zero calibration per connection
    pub zero_calibration_build: u32,
    /// Whether the firmware build decides if zero calibration is needed
    pub supports_zero_calibration_query: bool,
}

impl Default for ColorCalConfig {
    fn default() -> Self {
        Self {
            port: default_port().to_string(),
            baud_rate: 115_200,
            timeout_ms: 100,
            calibration_timeout_ms: 1_000,
            measure_timeout_ms: 5_000,
            max_attempts: 2,
            zero_tolerance: 3.0,
            zero_calibration_build: 877,
            supports_zero_calibration_query: true,
        }
    }
}

impl ColorCalConfig {
    /// Configuration for `port` with every other value at its default.
    pub fn for_port(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    /// Port parameters for opening the transport
    pub fn port_settings(&self) -> PortSettings {
        PortSettings::new(&self.port, self.baud_rate, self.timeout())
    }

    /// Ordinary command timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Calibration command timeout
    pub fn calibration_timeout(&self) -> Duration {
        Duration::from_millis(self.calibration_timeout_ms)
    }

    /// Measurement timeout
    pub fn measure_timeout(&self) -> Duration {
        Duration::from_millis(self.measure_timeout_ms)
    }
}

/// OptiCal session parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptiCalConfig {
    /// Serial port path
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout (milliseconds)
    pub timeout_ms: u64,
}

impl Default for OptiCalConfig {
    fn default() -> Self {
        Self {
            port: default_port().to_string(),
            baud_rate: 9_600,
            timeout_ms: 10_000,
        }
    }
}

impl OptiCalConfig {
    /// Port parameters for opening the transport
    pub fn port_settings(&self) -> PortSettings {
        PortSettings::new(
            &self.port,
            self.baud_rate,
            Duration::from_millis(self.timeout_ms),
        )
    }
}

/// Bits++ box parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitsConfig {
    /// Mode name (`bits++`, `mono++`, `color++` or an alias)
    pub mode: String,
    /// Contrast of the initial ramp, 0..=1
    pub contrast: f64,
    /// One gamma for all guns, `[R, G, B]`, or `[L, R, G, B]`
    pub gamma: Vec<f64>,
    /// Fraction of the LUT covered by the initial ramp
    pub lut_range: f64,
}

impl Default for BitsConfig {
    fn default() -> Self {
        Self {
            mode: "bits++".to_string(),
            contrast: 1.0,
            gamma: vec![1.0, 1.0, 1.0],
            lut_range: 1.0,
        }
    }
}

fn default_port() -> &'static str {
    if cfg!(target_os = "macos") {
        "/dev/cu.usbmodem0001"
    } else if cfg!(windows) {
        "COM3"
    } else {
        "/dev/ttyACM0"
    }
}

impl CrsConfig {
    /// Load configuration from a TOML file and `CRS_` environment variables.
    ///
    /// A missing file is not an error: defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> CrsResult<Self> {
        Ok(Self::figment(path).extract()?)
    }

    /// The provider stack used by [`CrsConfig::load_from`].
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(CrsConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("CRS_").split("__"))
    }

    /// Serialize to TOML, e.g. to write a template file.
    pub fn to_toml(&self) -> CrsResult<String> {
        toml::to_string_pretty(self).map_err(|e| CrsError::Configuration(e.to_string()))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> CrsResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(CrsError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.colorcal.port.trim().is_empty() {
            return Err(CrsError::Configuration("colorcal.port is empty".into()));
        }
        if self.optical.port.trim().is_empty() {
            return Err(CrsError::Configuration("optical.port is empty".into()));
        }

        let timeouts = [
            ("colorcal.timeout_ms", self.colorcal.timeout_ms),
            (
                "colorcal.calibration_timeout_ms",
                self.colorcal.calibration_timeout_ms,
            ),
            ("colorcal.measure_timeout_ms", self.colorcal.measure_timeout_ms),
            ("optical.timeout_ms", self.optical.timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(CrsError::Configuration(format!("{name} must be positive")));
            }
        }

        if !(0.0..=1.0).contains(&self.bits.contrast) {
            return Err(CrsError::Configuration(format!(
                "bits.contrast {} out of range 0-1",
                self.bits.contrast
            )));
        }
        if !matches!(self.bits.gamma.len(), 1 | 3 | 4) {
            return Err(CrsError::Configuration(format!(
                "bits.gamma must have 1, 3 or 4 values, got {}",
                self.bits.gamma.len()
            )));
        }
        if self.bits.gamma.iter().any(|g| !(*g > 0.0)) {
            return Err(CrsError::Configuration(
                "bits.gamma values must be positive".into(),
            ));
        }
        if !(self.bits.lut_range > 0.0 && self.bits.lut_range <= 1.0) {
            return Err(CrsError::Configuration(format!(
                "bits.lut_range {} out of range (0, 1]",
                self.bits.lut_range
            )));
        }

        Ok(())
    }
}
