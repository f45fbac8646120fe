//! Terminator-delimited byte reader.
//!
//! Serial line readers in most libraries only stop on `\n`. The ColorCAL ends
//! its lines with `\n\r`, so lines are assembled here one byte at a time and
//! matched against an arbitrary multi-byte terminator.

use crate::error::CrsResult;
use crate::transport::Transport;

/// Read from `transport` until the buffer ends with `terminator`.
///
/// Stops early when `max_bytes` bytes have been read or when a single-byte
/// read comes back empty (the transport's per-byte timeout expired). In every
/// case the bytes accumulated so far are returned, terminator included.
pub fn read_until<T: Transport + ?Sized>(
    transport: &mut T,
    max_bytes: Option<usize>,
    terminator: &[u8],
) -> CrsResult<Vec<u8>> {
    let mut line = Vec::new();

    loop {
        let byte = transport.read(1)?;
        if byte.is_empty() {
            break;
        }
        line.extend_from_slice(&byte);

        if !terminator.is_empty() && line.ends_with(terminator) {
            break;
        }
        if max_bytes.is_some_and(|max| line.len() >= max) {
            break;
        }
    }

    Ok(line)
}
