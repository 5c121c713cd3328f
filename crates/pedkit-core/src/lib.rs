//! pedkit-core: shared key model, configuration schema and error types.
//!
//! Every other pedkit crate speaks in terms of the enums defined here, so a
//! key injected over the wire, persisted by the store and loaded into a PED
//! keeps one vocabulary end to end.

pub mod config;
pub mod error;
pub mod types;

pub use error::{PedkitError, PedkitResult};
pub use types::{Kcv, KeyAlgorithm, KeyStatus, KeyType};

/// Number of KCV bytes kept from the zero-block encryption.
pub const KCV_LEN: usize = 3;

/// Number of KCV hex characters exchanged on the wire.
pub const WIRE_KCV_CHARS: usize = 4;

/// Compare two KCV renderings on their wire-significant prefix.
///
/// Hosts send only the first four hex characters; stored records carry six.
/// Comparison is case-insensitive.
pub fn kcv_prefix_matches(a: &str, b: &str) -> bool {
    if a.len() < WIRE_KCV_CHARS || b.len() < WIRE_KCV_CHARS {
        return false;
    }
    a[..WIRE_KCV_CHARS].eq_ignore_ascii_case(&b[..WIRE_KCV_CHARS])
}

/// Decode a hex string after stripping whitespace.
pub fn decode_hex(input: &str) -> PedkitResult<Vec<u8>> {
    let clean: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&clean).map_err(|e| PedkitError::InvalidHex(format!("{e}: '{clean}'")))
}

/// Current Unix time in seconds.
pub fn now_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kcv_prefix_is_case_insensitive() {
        assert!(kcv_prefix_matches("a1b2c3", "A1B2"));
        assert!(!kcv_prefix_matches("a1b2c3", "A1B3"));
        assert!(!kcv_prefix_matches("A1", "A1B2"));
    }

    #[test]
    fn decode_hex_strips_whitespace() {
        assert_eq!(decode_hex("01 02\n03").unwrap(), vec![1, 2, 3]);
        assert!(decode_hex("0G").is_err());
        assert!(decode_hex("012").is_err());
    }
}
