//! Reply line parsing and vendor numeric decoding.
//!
//! ColorCAL replies are comma separated: a status code followed by data
//! fields, e.g. `OK00,10635,50631,9987`. The status is `OK00` on success or a
//! numbered error such as `ER11`.

use crate::error::{CrsError, CrsResult};
use std::fmt;
use std::str::FromStr;

/// Success sentinel at the start of every accepted reply.
pub const SUCCESS: &str = "OK00";

/// Offset separating positive from negative values in the fixed-point scheme.
const NEGATIVE_OFFSET: f64 = 50_000.0;
const FIXED_POINT_SCALE: f64 = 10_000.0;

/// Status code at the head of a reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// `OK00`
    Ok,
    /// Numbered error code (`ER11`, `EE03`, ...), kept verbatim.
    Error(String),
    /// Anything that is neither the sentinel nor a numbered error.
    Other(String),
}

impl Status {
    fn from_field(field: &str) -> Self {
        if field == SUCCESS {
            return Status::Ok;
        }
        let bytes = field.as_bytes();
        let numbered = bytes.len() == 4
            && bytes[0] == b'E'
            && bytes[1].is_ascii_uppercase()
            && bytes[2..].iter().all(u8::is_ascii_digit);
        if numbered {
            Status::Error(field.to_string())
        } else {
            Status::Other(field.to_string())
        }
    }

    /// The status text as received.
    pub fn as_str(&self) -> &str {
        match self {
            Status::Ok => SUCCESS,
            Status::Error(code) | Status::Other(code) => code,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed reply line.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyLine {
    raw: String,
    status: Status,
    fields: Vec<String>,
}

impl ReplyLine {
    /// Whether the line starts with the success sentinel.
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Status code of the line.
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Data fields after the status code.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// The line as received.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Turn a non-OK line into a `Protocol` error for `command`.
    pub fn ensure_ok(self, command: &str) -> CrsResult<Self> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(CrsError::Protocol {
                command: command.to_string(),
                reply: self.raw,
            })
        }
    }

    /// Parse the first `count` data fields as `T`.
    ///
    /// # Errors
    /// `CrsError::Decode` when fewer than `count` fields are present or one
    /// of them does not parse.
    pub fn numeric_fields<T: FromStr>(&self, count: usize) -> CrsResult<Vec<T>> {
        if self.fields.len() < count {
            return Err(CrsError::Decode(format!(
                "expected {count} fields in '{}', found {}",
                self.raw,
                self.fields.len()
            )));
        }

        self.fields[..count]
            .iter()
            .map(|field| {
                field.trim().parse::<T>().map_err(|_| {
                    CrsError::Decode(format!("non-numeric field '{field}' in '{}'", self.raw))
                })
            })
            .collect()
    }
}

/// Split a reply line into status and fields.
pub fn parse(line: &str) -> ReplyLine {
    let mut parts = line.split(',');
    let status = Status::from_field(parts.next().unwrap_or_default().trim());
    let fields = parts.map(str::to_string).collect();

    ReplyLine {
        raw: line.to_string(),
        status,
        fields,
    }
}

/// Decode one value of the vendor fixed-point scheme.
///
/// Positive values are stored as `v * 10000`, negative values as
/// `|v| * 10000 + 50000`.
pub fn decode_fixed_point(raw: u32) -> f64 {
    let raw = f64::from(raw);
    if raw < NEGATIVE_OFFSET {
        raw / FIXED_POINT_SCALE
    } else {
        (NEGATIVE_OFFSET - raw) / FIXED_POINT_SCALE
    }
}

/// Decode a sequence of fixed-point values elementwise.
pub fn decode_fixed_point_all(raw: &[u32]) -> Vec<f64> {
    raw.iter().copied().map(decode_fixed_point).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_success_line() {
        let reply = parse("OK00,1.0,2.0,3.0");
        assert!(reply.is_ok());
        assert_eq!(reply.fields(), &["1.0", "2.0", "3.0"]);
    }

    #[test]
    fn parse_error_code() {
        let reply = parse("ER11");
        assert!(!reply.is_ok());
        assert_eq!(reply.status(), &Status::Error("ER11".to_string()));
        assert!(reply.fields().is_empty());
    }

    #[test]
    fn unknown_status_is_not_ok() {
        let reply = parse("garbage,1");
        assert!(!reply.is_ok());
        assert_eq!(reply.status(), &Status::Other("garbage".to_string()));
        assert_eq!(reply.status().to_string(), "garbage");
    }

    #[test]
    fn sentinel_must_match_exactly() {
        assert!(!parse("OK000,1").is_ok());
        assert!(!parse("ok00").is_ok());
    }

    #[test]
    fn ensure_ok_reports_raw_reply() {
        match parse("ER03,x").ensure_ok("MES") {
            Err(CrsError::Protocol { command, reply }) => {
                assert_eq!(command, "MES");
                assert_eq!(reply, "ER03,x");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn numeric_fields_fail_loudly() {
        let short = parse("OK00,1,2");
        assert!(matches!(
            short.numeric_fields::<u32>(3),
            Err(CrsError::Decode(_))
        ));

        let text = parse("OK00,1,abc,3");
        assert!(matches!(
            text.numeric_fields::<f64>(3),
            Err(CrsError::Decode(_))
        ));

        let good = parse("OK00,10635,50631,9987");
        assert_eq!(
            good.numeric_fields::<u32>(3).unwrap(),
            vec![10635, 50631, 9987]
        );
    }

    #[test]
    fn decode_known_values() {
        assert_eq!(decode_fixed_point(50347), -0.0347);
        assert_eq!(decode_fixed_point(10630), 1.0630);
        assert_eq!(decode_fixed_point_all(&[10635, 50631]), vec![1.0635, -0.0631]);
    }

    #[test]
    fn decode_boundary() {
        assert_eq!(decode_fixed_point(0), 0.0);
        assert_eq!(decode_fixed_point(49_999), 4.9999);
        assert_eq!(decode_fixed_point(50_000), 0.0);
    }

    #[test]
    fn scalar_and_slice_paths_agree() {
        let raw: Vec<u32> = (0..100_000).step_by(7).collect();
        let decoded = decode_fixed_point_all(&raw);
        for (value, out) in raw.iter().zip(&decoded) {
            assert_eq!(decode_fixed_point(*value).to_bits(), out.to_bits());
        }
    }

    #[test]
    fn decoded_range_and_ordering() {
        let mut prev_positive = f64::NEG_INFINITY;
        let mut prev_magnitude = f64::NEG_INFINITY;

        for raw in 0..100_000u32 {
            let value = decode_fixed_point(raw);
            assert!((-5.0..10.0).contains(&value), "{raw} -> {value}");

            if raw < 50_000 {
                assert!(value >= prev_positive);
                prev_positive = value;
            } else {
                assert!(value.abs() >= prev_magnitude);
                prev_magnitude = value.abs();
            }
        }
    }
}
