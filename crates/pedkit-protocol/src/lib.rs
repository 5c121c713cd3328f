//! pedkit-protocol: the host-to-terminal key injection wire format.
//!
//! ```text
//!   0x02  <ASCII payload>  0x03  <LRC>
//!   STX   code(2) fields…  ETX   XOR(payload ‖ ETX)
//! ```
//!
//! Bytes from the serial link go through [`FrameCodec`], which yields
//! checksum-validated payloads in arrival order. [`MessageParser`] turns a
//! payload into a typed [`Message`]; [`formatter`] builds payloads and frames
//! for the way back.

pub mod error_code;
pub mod formatter;
pub mod frame;
pub mod message;
pub mod parser;

pub use error_code::ErrorCode;
pub use frame::{FrameCodec, FrameError};
pub use message::Message;
pub use parser::{MessageParser, ParseError};

/// Start-of-text marker
pub const STX: u8 = 0x02;

/// End-of-text marker
pub const ETX: u8 = 0x03;

/// Default cap on buffered, not-yet-framed bytes.
pub const DEFAULT_MAX_BUFFER: usize = 64 * 1024;

/// Longitudinal redundancy check: XOR of every byte.
///
/// Callers pass `payload ‖ ETX`.
pub fn lrc(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}
