//! Bits++ lookup table and the header+LUT line sent to the box.
//!
//! The box reads its 16-bit LUT from the first line of each video frame: a
//! 12-pixel magic header followed by 512 pixels holding, for each of the 256
//! entries, the most significant byte and then the least significant byte of
//! each gun.

use super::encode::{lsb, msb, to_u16};
use crate::error::{CrsError, CrsResult};
use std::ops::RangeInclusive;

/// Number of LUT entries.
pub const LUT_ENTRIES: usize = 256;
/// Pixels of magic header before the LUT data.
pub const HEADER_ROWS: usize = 12;
/// Total pixels in the header+LUT line.
pub const BUFFER_ROWS: usize = HEADER_ROWS + 2 * LUT_ENTRIES;

/// Magic header recognised by the box, one RGB triple per pixel.
const HEADER: [[u8; 3]; HEADER_ROWS] = [
    [36, 106, 133],
    [63, 136, 163],
    [8, 19, 138],
    [211, 25, 46],
    [3, 115, 164],
    [112, 68, 9],
    [56, 41, 49],
    [34, 159, 208],
    [0, 0, 0],
    [0, 0, 0],
    [0, 0, 0],
    [0, 0, 0],
];

const MAX_INDEX: f64 = (LUT_ENTRIES - 1) as f64;

/// Entries of the LUT affected by a write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LutRange {
    /// Central fraction of the table; `1.0` is the whole table.
    Fraction(f64),
    /// Start and end points. Fractions of the table when the end is at most
    /// 1, entry indices otherwise.
    Span(f64, f64),
}

impl Default for LutRange {
    fn default() -> Self {
        LutRange::Fraction(1.0)
    }
}

impl LutRange {
    /// Inclusive entry indices covered by this range.
    ///
    /// ```
    /// use crs_devices::bits::LutRange;
    ///
    /// assert_eq!(LutRange::Fraction(0.5).indices().unwrap(), 64..=191);
    /// assert_eq!(LutRange::Span(63.0, 127.0).indices().unwrap(), 63..=127);
    /// ```
    pub fn indices(&self) -> CrsResult<RangeInclusive<usize>> {
        let (start, end) = match *self {
            LutRange::Fraction(fraction) => {
                if !(0.0..=1.0).contains(&fraction) {
                    return Err(CrsError::InvalidLut(format!(
                        "LUT range fraction {fraction} out of range 0-1"
                    )));
                }
                (
                    ((0.5 - fraction / 2.0) * MAX_INDEX).round(),
                    ((0.5 + fraction / 2.0) * MAX_INDEX).round(),
                )
            }
            LutRange::Span(start, end) => {
                let multiplier = if end <= 1.0 { MAX_INDEX } else { 1.0 };
                ((start * multiplier).round(), (end * multiplier).round())
            }
        };

        if !(0.0..=MAX_INDEX).contains(&start) || !(0.0..=MAX_INDEX).contains(&end) || start > end {
            return Err(CrsError::InvalidLut(format!(
                "LUT range {self:?} does not select entries within 0-255"
            )));
        }
        Ok(start as usize..=end as usize)
    }
}

/// Values written into a LUT range.
#[derive(Debug, Clone, PartialEq)]
pub enum LutValues {
    /// One value for every entry and gun.
    Scalar(f64),
    /// One value per entry, replicated to all three guns.
    Vector(Vec<f64>),
    /// One RGB triple per entry.
    Matrix(Vec<[f64; 3]>),
}

impl LutValues {
    fn len(&self) -> Option<usize> {
        match self {
            LutValues::Scalar(_) => None,
            LutValues::Vector(values) => Some(values.len()),
            LutValues::Matrix(values) => Some(values.len()),
        }
    }

    fn out_of_range(&self) -> Option<f64> {
        let in_range = |v: &f64| (0.0..=1.0).contains(v);
        match self {
            LutValues::Scalar(v) => Some(*v).filter(|v| !in_range(v)),
            LutValues::Vector(values) => values.iter().copied().find(|v| !in_range(v)),
            LutValues::Matrix(values) => values.iter().flatten().copied().find(|v| !in_range(v)),
        }
    }

    fn entry(&self, index: usize) -> [f64; 3] {
        match self {
            LutValues::Scalar(v) => [*v; 3],
            LutValues::Vector(values) => [values[index]; 3],
            LutValues::Matrix(values) => values[index],
        }
    }
}

/// 256 RGB entries in 0..=1.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupTable {
    entries: [[f64; 3]; LUT_ENTRIES],
}

impl Default for LookupTable {
    fn default() -> Self {
        Self {
            entries: [[0.0; 3]; LUT_ENTRIES],
        }
    }
}

impl LookupTable {
    /// All-zero table.
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries.
    pub fn entries(&self) -> &[[f64; 3]; LUT_ENTRIES] {
        &self.entries
    }

    /// One entry.
    pub fn entry(&self, index: usize) -> Option<[f64; 3]> {
        self.entries.get(index).copied()
    }

    /// Overwrite the entries in `range` with `values`.
    ///
    /// Nothing is written unless the values fit: a vector or matrix must have
    /// exactly one row per entry in the range, and every value must lie in
    /// 0..=1.
    pub fn fill(&mut self, range: &LutRange, values: &LutValues) -> CrsResult<()> {
        let indices = range.indices()?;
        let count = indices.end() - indices.start() + 1;

        if let Some(len) = values.len() {
            if len != count {
                return Err(CrsError::InvalidLut(format!(
                    "{len} LUT values for a range of {count} entries"
                )));
            }
        }
        if let Some(bad) = values.out_of_range() {
            return Err(CrsError::InvalidLut(format!(
                "LUT value {bad} outside 0.0-1.0"
            )));
        }

        for (offset, index) in indices.enumerate() {
            self.entries[index] = values.entry(offset);
        }
        Ok(())
    }

    /// Raise each entry in `range` to `1/gamma`, per gun.
    pub fn gamma_correct(&mut self, range: &LutRange, gamma: [f64; 3]) -> CrsResult<()> {
        for index in range.indices()? {
            for (value, g) in self.entries[index].iter_mut().zip(gamma) {
                *value = value.powf(1.0 / g);
            }
        }
        Ok(())
    }
}

/// The 524-pixel header+LUT line in the box's wire layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LutBuffer {
    rows: [[u8; 3]; BUFFER_ROWS],
}

impl Default for LutBuffer {
    fn default() -> Self {
        let mut rows = [[0u8; 3]; BUFFER_ROWS];
        rows[..HEADER_ROWS].copy_from_slice(&HEADER);
        Self { rows }
    }
}

impl LutBuffer {
    /// Buffer with the header and an all-zero LUT.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer holding `table`.
    pub fn from_table(table: &LookupTable) -> Self {
        let mut buffer = Self::new();
        buffer.update(table);
        buffer
    }

    /// Rewrite the LUT part from `table`. The header is untouched.
    pub fn update(&mut self, table: &LookupTable) {
        for (i, entry) in table.entries().iter().enumerate() {
            let words = entry.map(to_u16);
            self.rows[HEADER_ROWS + 2 * i] = words.map(msb);
            self.rows[HEADER_ROWS + 2 * i + 1] = words.map(lsb);
        }
    }

    /// All pixels, header first.
    pub fn rows(&self) -> &[[u8; 3]; BUFFER_ROWS] {
        &self.rows
    }

    /// The header pixels.
    pub fn header(&self) -> &[[u8; 3]] {
        &self.rows[..HEADER_ROWS]
    }

    /// Pixels as packed RGB bytes, 3 per pixel.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.rows.iter().flatten().copied().collect()
    }
}
