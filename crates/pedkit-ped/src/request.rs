//! Requests and results exchanged with a PED.

use pedkit_core::{Kcv, KeyAlgorithm, KeyType};
use pedkit_crypto::dukpt::KeyVariant;
use pedkit_crypto::{CipherMode, MacAlgorithm, PinBlockFormat};

use crate::error::{PedError, PedResult};

/// Device health as reported by the PED.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PedStatus {
    pub tampered: bool,
    pub battery_percent: Option<u8>,
    pub error_message: Option<String>,
}

/// Identification of the PED.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: Option<String>,
    pub firmware: Option<String>,
    pub hardware: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub slot: u32,
    pub key_type: KeyType,
    pub algorithm: KeyAlgorithm,
    pub kcv: Option<Kcv>,
}

/// DUKPT state read back from the hardware counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DukptInfo {
    pub ksn: Vec<u8>,
    pub counter: Option<u32>,
}

impl DukptInfo {
    pub fn ksn_hex(&self) -> String {
        hex::encode_upper(&self.ksn)
    }
}

/// A key encrypted under a resident transport key, with its optional check value.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedKey {
    pub ciphertext: Vec<u8>,
    /// Wire (4 chars) or full (6 chars) KCV of the clear key
    pub kcv: Option<String>,
}

impl std::fmt::Debug for EncryptedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedKey")
            .field("len", &self.ciphertext.len())
            .field("kcv", &self.kcv)
            .finish()
    }
}

/// Selects a DUKPT group instead of a fixed slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DukptUse {
    pub group: u32,
    pub variant: KeyVariant,
    /// Advance the transaction counter before deriving the key
    pub increment_ksn: bool,
}

impl DukptUse {
    pub fn new(group: u32, variant: KeyVariant) -> Self {
        Self {
            group,
            variant,
            increment_ksn: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CipherRequest {
    pub slot: u32,
    pub key_type: KeyType,
    pub algorithm: KeyAlgorithm,
    pub mode: CipherMode,
    pub iv: Option<Vec<u8>>,
    pub data: Vec<u8>,
    pub dukpt: Option<DukptUse>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherResult {
    pub data: Vec<u8>,
    pub dukpt: Option<DukptInfo>,
}

#[derive(Debug, Clone)]
pub struct MacRequest {
    pub slot: u32,
    pub key_type: KeyType,
    pub key_algorithm: KeyAlgorithm,
    pub algorithm: MacAlgorithm,
    pub data: Vec<u8>,
    pub dukpt: Option<DukptUse>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacResult {
    pub mac: Vec<u8>,
    pub dukpt: Option<DukptInfo>,
}

/// Allowed PIN lengths, written `"4-6"` or `"0,4,6,8"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinLength(Vec<u8>);

impl PinLength {
    pub fn parse(constraint: &str) -> PedResult<Self> {
        let bad = || PedError::InvalidRequest(format!("PIN length constraint '{constraint}'"));
        let mut lengths = Vec::new();
        for part in constraint.split(',').map(str::trim) {
            match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo: u8 = lo.trim().parse().map_err(|_| bad())?;
                    let hi: u8 = hi.trim().parse().map_err(|_| bad())?;
                    if lo > hi {
                        return Err(bad());
                    }
                    lengths.extend(lo..=hi);
                }
                None => lengths.push(part.parse().map_err(|_| bad())?),
            }
        }
        if lengths.iter().any(|&l| l > 12) {
            return Err(bad());
        }
        lengths.sort_unstable();
        lengths.dedup();
        Ok(Self(lengths))
    }

    pub fn allows(&self, len: usize) -> bool {
        self.0.iter().any(|&l| usize::from(l) == len)
    }
}

#[derive(Debug, Clone)]
pub struct PinRequest {
    pub slot: u32,
    pub key_type: KeyType,
    pub length: PinLength,
    pub pan: Option<String>,
    pub timeout_secs: u64,
    pub prompt: Option<String>,
    pub format: PinBlockFormat,
    pub algorithm: KeyAlgorithm,
    pub dukpt: Option<DukptUse>,
    pub allow_bypass: bool,
}

#[derive(Clone, PartialEq, Eq)]
pub struct PinResult {
    /// Encrypted PIN block; all zeros when the cardholder bypassed entry
    pub pin_block: [u8; 8],
    pub bypassed: bool,
    pub dukpt: Option<DukptInfo>,
}

impl std::fmt::Debug for PinResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinResult")
            .field("pin_block", &hex::encode_upper(self.pin_block))
            .field("bypassed", &self.bypassed)
            .field("dukpt", &self.dukpt)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_length_range() {
        let len = PinLength::parse("4-6").unwrap();
        assert!(!len.allows(3));
        assert!(len.allows(4));
        assert!(len.allows(6));
        assert!(!len.allows(7));
    }

    #[test]
    fn test_pin_length_list_and_mixed() {
        let len = PinLength::parse("0, 4,6-8").unwrap();
        assert!(len.allows(0));
        assert!(!len.allows(5));
        assert!(len.allows(7));
    }

    #[test]
    fn test_pin_length_rejects_garbage() {
        assert!(PinLength::parse("6-4").is_err());
        assert!(PinLength::parse("four").is_err());
        assert!(PinLength::parse("4-13").is_err());
    }
}
