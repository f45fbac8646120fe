//! Line protocol shared by the serial drivers.
//!
//! - [`reader`]: assembles terminator-delimited lines byte by byte
//! - [`session`]: the command/reply exchange with drain, prompt and retry budget
//! - [`parser`]: status/field splitting and vendor fixed-point decoding

pub mod parser;
pub mod reader;
pub mod session;

pub use parser::{decode_fixed_point, decode_fixed_point_all, parse, ReplyLine, Status};
pub use reader::read_until;
pub use session::{LineFraming, Reply, SerialSession};
