//! 16-bit fixed-point packing for the Bits++ family.
//!
//! Intensities in 0..=1 become 16-bit words split into a most significant and
//! a least significant byte. Mono++ carries the pair in the red and green
//! channels of one pixel; Color++ spreads each pixel over two horizontally
//! adjacent output pixels, MSBs first.

use crate::error::{CrsError, CrsResult};

const WORD_MAX: f64 = 65_535.0;

/// Scale an intensity in 0..=1 to a 16-bit word, rounding to nearest.
///
/// Values outside 0..=1 saturate.
pub fn to_u16(value: f64) -> u16 {
    (value.clamp(0.0, 1.0) * WORD_MAX).round() as u16
}

/// High byte of a word.
pub fn msb(word: u16) -> u8 {
    (word >> 8) as u8
}

/// Low byte of a word.
pub fn lsb(word: u16) -> u8 {
    (word & 0xFF) as u8
}

fn check_intensity(value: f64) -> CrsResult<f64> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(CrsError::InvalidLut(format!(
            "intensity {value} outside 0.0-1.0"
        )))
    }
}

/// Mono++ packing: one RGBA pixel per intensity, R = MSB, G = LSB, B = 0,
/// A = 255.
pub fn encode_mono(values: &[f64]) -> CrsResult<Vec<[u8; 4]>> {
    values
        .iter()
        .map(|&value| {
            let word = to_u16(check_intensity(value)?);
            Ok([msb(word), lsb(word), 0, 255])
        })
        .collect()
}

/// Color++ packing: two RGB pixels per input pixel. The even output pixel
/// holds the MSBs of each channel, the odd one the LSBs. Output is twice as
/// wide as the input.
pub fn encode_color(pixels: &[[f64; 3]]) -> CrsResult<Vec<[u8; 3]>> {
    let mut out = Vec::with_capacity(pixels.len() * 2);
    for pixel in pixels {
        let mut words = [0u16; 3];
        for (word, value) in words.iter_mut().zip(pixel) {
            *word = to_u16(check_intensity(*value)?);
        }
        out.push(words.map(msb));
        out.push(words.map(lsb));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_scaling_rounds() {
        assert_eq!(to_u16(0.0), 0);
        assert_eq!(to_u16(1.0), 65_535);
        assert_eq!(to_u16(0.5), 32_768);
        assert_eq!(to_u16(1.0 / 65_535.0 * 0.4), 0);
        assert_eq!(to_u16(1.0 / 65_535.0 * 0.6), 1);
    }

    #[test]
    fn word_scaling_saturates() {
        assert_eq!(to_u16(-0.5), 0);
        assert_eq!(to_u16(2.0), 65_535);
    }

    #[test]
    fn byte_split() {
        assert_eq!(msb(0xABCD), 0xAB);
        assert_eq!(lsb(0xABCD), 0xCD);
        assert_eq!((u16::from(msb(0x1234)) << 8) | u16::from(lsb(0x1234)), 0x1234);
    }

    #[test]
    fn mono_pixels() {
        let pixels = encode_mono(&[0.0, 0.5, 1.0]).unwrap();
        assert_eq!(
            pixels,
            vec![[0, 0, 0, 255], [0x80, 0x00, 0, 255], [0xFF, 0xFF, 0, 255]]
        );
    }

    #[test]
    fn color_pixels_double_width() {
        let pixels = encode_color(&[[1.0, 0.5, 0.0], [0.25, 0.0, 1.0]]).unwrap();
        assert_eq!(
            pixels,
            vec![
                [0xFF, 0x80, 0x00],
                [0xFF, 0x00, 0x00],
                [0x40, 0x00, 0xFF],
                [0x00, 0x00, 0xFF],
            ]
        );
    }

    #[test]
    fn encoders_reject_out_of_range() {
        assert!(matches!(encode_mono(&[0.2, 1.1]), Err(CrsError::InvalidLut(_))));
        assert!(matches!(
            encode_color(&[[0.0, f64::NAN, 0.0]]),
            Err(CrsError::InvalidLut(_))
        ));
    }
}
