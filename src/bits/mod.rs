//! CRS Bits++ display box
//!
//! The box sits between the graphics card and the monitor and decodes a
//! 14-bit-per-gun image from an ordinary 8-bit video signal. Three modes:
//! - **Bits++**: 8-bit indexed pixels through a 16-bit LUT that is
//!   transmitted in the first line of every frame ([`LutBuffer`])
//! - **Mono++**: 16-bit luminance packed into red (MSB) and green (LSB)
//! - **Color++**: 16-bit RGB at half horizontal resolution, each pixel spread
//!   over two output pixels
//!
//! [`BitsBox`] keeps the LUT and its encoded buffer; drawing the buffer is
//! left to the caller's [`LutSink`].
//!
//! # Example
//!
//! ```
//! use crs_devices::bits::{BitsBox, BitsMode, LutRange};
//!
//! let mut bits = BitsBox::new(BitsMode::BitsPlusPlus, 1.0, &[2.2])?;
//! // Stimuli drawn at contrast 0.5 are displayed at full contrast.
//! bits.set_contrast(1.0, LutRange::Fraction(0.5))?;
//!
//! let mut frame_line: Vec<u8> = Vec::new();
//! bits.push(&mut frame_line)?;
//! assert_eq!(frame_line.len(), 524 * 3);
//! # Ok::<(), crs_devices::error::CrsError>(())
//! ```

pub mod encode;
pub mod lut;

pub use encode::{encode_color, encode_mono, lsb, msb, to_u16};
pub use lut::{LookupTable, LutBuffer, LutRange, LutValues, BUFFER_ROWS, HEADER_ROWS, LUT_ENTRIES};

use crate::config::BitsConfig;
use crate::error::{CrsError, CrsResult};
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use tracing::debug;

/// Operating mode of the box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitsMode {
    /// 8-bit indexed colour through a 16-bit LUT.
    BitsPlusPlus,
    /// 16-bit luminance in red+green.
    MonoPlusPlus,
    /// 16-bit RGB at half horizontal resolution.
    ColorPlusPlus,
}

impl FromStr for BitsMode {
    type Err = CrsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bits" | "bits++" => Ok(BitsMode::BitsPlusPlus),
            "mono" | "mono++" => Ok(BitsMode::MonoPlusPlus),
            "color" | "color++" | "colour" | "colour++" => Ok(BitsMode::ColorPlusPlus),
            other => Err(CrsError::Configuration(format!(
                "Unknown mode '{other}' for BitsBox"
            ))),
        }
    }
}

impl fmt::Display for BitsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BitsMode::BitsPlusPlus => "bits++",
            BitsMode::MonoPlusPlus => "mono++",
            BitsMode::ColorPlusPlus => "color++",
        };
        f.write_str(name)
    }
}

/// Destination of the header+LUT line, normally the top row of the next
/// video frame.
pub trait LutSink {
    /// Draw or transmit `buffer`.
    fn draw_lut(&mut self, buffer: &LutBuffer) -> CrsResult<()>;
}

/// Any byte writer receives the packed RGB bytes.
impl<W: Write> LutSink for W {
    fn draw_lut(&mut self, buffer: &LutBuffer) -> CrsResult<()> {
        self.write_all(&buffer.to_bytes())?;
        Ok(())
    }
}

/// Per-gun gamma from one value, `[R, G, B]`, or `[L, R, G, B]`.
pub fn gun_gamma(gamma: &[f64]) -> CrsResult<[f64; 3]> {
    let guns = match *gamma {
        [g] => [g; 3],
        [r, g, b] | [_, r, g, b] => [r, g, b],
        _ => {
            return Err(CrsError::InvalidLut(format!(
                "gamma must have 1, 3 or 4 values, got {}",
                gamma.len()
            )))
        }
    };
    if guns.iter().any(|g| !(*g > 0.0 && g.is_finite())) {
        return Err(CrsError::InvalidLut(format!(
            "gamma values must be positive, got {guns:?}"
        )));
    }
    Ok(guns)
}

/// Contrast ramp of `n` entries from `(1 - contrast) / 2` to `(1 + contrast) / 2`.
pub fn contrast_ramp(n: usize, contrast: f64) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![0.5],
        _ => {
            let last = (n - 1) as f64;
            (0..n)
                .map(|i| ((2.0 * i as f64 / last - 1.0) * contrast + 1.0) / 2.0)
                .collect()
        }
    }
}

fn check_contrast(contrast: f64) -> CrsResult<()> {
    if (0.0..=1.0).contains(&contrast) {
        Ok(())
    } else {
        Err(CrsError::InvalidLut(format!(
            "contrast {contrast} out of range 0-1"
        )))
    }
}

/// A Bits++ box: mode, contrast, gamma and the LUT it displays.
#[derive(Debug, Clone)]
pub struct BitsBox {
    mode: BitsMode,
    contrast: f64,
    gamma: [f64; 3],
    table: LookupTable,
    buffer: LutBuffer,
}

impl BitsBox {
    /// Create a box with a full-range contrast ramp, gamma corrected.
    pub fn new(mode: BitsMode, contrast: f64, gamma: &[f64]) -> CrsResult<Self> {
        check_contrast(contrast)?;
        let mut bits = Self {
            mode,
            contrast,
            gamma: gun_gamma(gamma)?,
            table: LookupTable::new(),
            buffer: LutBuffer::new(),
        };
        bits.set_lut(None, true, LutRange::default())?;
        debug!(%mode, contrast, gamma = ?bits.gamma, "BitsBox initialised");
        Ok(bits)
    }

    /// Create a box from configuration, ramping `lut_range` of the table.
    pub fn from_config(config: &BitsConfig) -> CrsResult<Self> {
        if !(config.lut_range > 0.0 && config.lut_range <= 1.0) {
            return Err(CrsError::InvalidLut(format!(
                "lut_range {} out of range (0, 1]",
                config.lut_range
            )));
        }
        let mut bits = Self::new(config.mode.parse()?, config.contrast, &config.gamma)?;
        if config.lut_range < 1.0 {
            bits.table = LookupTable::new();
            bits.set_lut(None, true, LutRange::Fraction(config.lut_range))?;
        }
        Ok(bits)
    }

    /// Set entries of the LUT.
    ///
    /// `None` builds a ramp from the current contrast across `range`. With
    /// `gamma_correct` the written entries are linearised with the current
    /// gamma. Entries outside `range` keep their values.
    pub fn set_lut(
        &mut self,
        values: Option<LutValues>,
        gamma_correct: bool,
        range: LutRange,
    ) -> CrsResult<()> {
        let values = match values {
            Some(values) => values,
            None => {
                let indices = range.indices()?;
                let n = indices.end() - indices.start() + 1;
                LutValues::Vector(contrast_ramp(n, self.contrast))
            }
        };

        let mut table = self.table.clone();
        table.fill(&range, &values)?;
        if gamma_correct {
            table.gamma_correct(&range, self.gamma)?;
        }

        self.table = table;
        self.buffer.update(&self.table);
        debug!(?range, gamma_correct, "LUT updated");
        Ok(())
    }

    /// Set the contrast of `range` and rebuild its ramp.
    ///
    /// `set_contrast(1.0, LutRange::Fraction(0.5))` makes stimuli drawn at
    /// contrast 0.5 appear at full contrast.
    pub fn set_contrast(&mut self, contrast: f64, range: LutRange) -> CrsResult<()> {
        check_contrast(contrast)?;
        let previous = self.contrast;
        self.contrast = contrast;
        self.set_lut(None, true, range).inspect_err(|_| {
            self.contrast = previous;
        })
    }

    /// Set the gamma and reset the LUT to a full-range contrast ramp.
    pub fn set_gamma(&mut self, gamma: &[f64]) -> CrsResult<()> {
        self.gamma = gun_gamma(gamma)?;
        self.set_lut(None, true, LutRange::default())
    }

    /// Hand the header+LUT line to `sink`. Only meaningful in Bits++ mode.
    pub fn push(&self, sink: &mut dyn LutSink) -> CrsResult<()> {
        if self.mode != BitsMode::BitsPlusPlus {
            return Err(CrsError::InvalidState {
                operation: "push LUT",
                state: self.mode.to_string(),
            });
        }
        sink.draw_lut(&self.buffer)
    }

    /// Pack an intensity image for Mono++ mode.
    pub fn encode_mono(&self, values: &[f64]) -> CrsResult<Vec<[u8; 4]>> {
        self.require_mode(BitsMode::MonoPlusPlus, "encode mono++ image")?;
        encode_mono(values)
    }

    /// Pack an RGB image for Color++ mode.
    pub fn encode_color(&self, pixels: &[[f64; 3]]) -> CrsResult<Vec<[u8; 3]>> {
        self.require_mode(BitsMode::ColorPlusPlus, "encode color++ image")?;
        encode_color(pixels)
    }

    /// Operating mode.
    pub fn mode(&self) -> BitsMode {
        self.mode
    }

    /// Contrast of the most recent ramp.
    pub fn contrast(&self) -> f64 {
        self.contrast
    }

    /// Per-gun gamma.
    pub fn gamma(&self) -> [f64; 3] {
        self.gamma
    }

    /// Current LUT, gamma corrected.
    pub fn lut(&self) -> &LookupTable {
        &self.table
    }

    /// Encoded header+LUT line.
    pub fn buffer(&self) -> &LutBuffer {
        &self.buffer
    }

    fn require_mode(&self, mode: BitsMode, operation: &'static str) -> CrsResult<()> {
        if self.mode == mode {
            Ok(())
        } else {
            Err(CrsError::InvalidState {
                operation,
                state: self.mode.to_string(),
            })
        }
    }
}
