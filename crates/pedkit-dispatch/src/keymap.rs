//! Host wire codes → pedkit key model.

use pedkit_core::{KeyAlgorithm, KeyType};
use pedkit_ped::KeyError;
use tracing::warn;

/// Resolve the two-character key type (and sub-type for working keys).
pub fn key_type(code: &str, sub_type: &str) -> Result<KeyType, KeyError> {
    match code.to_ascii_uppercase().as_str() {
        "01" | "0F" => Ok(KeyType::Master),
        "06" => Ok(KeyType::Transport),
        "04" | "05" | "0C" => Ok(match sub_type {
            "01" => KeyType::WorkingPin,
            "02" => KeyType::WorkingMac,
            "03" => KeyType::WorkingData,
            _ => KeyType::Master,
        }),
        "02" | "03" | "08" | "0B" | "10" => Ok(KeyType::DukptInitial),
        other => Err(KeyError::UnsupportedKeyType(format!("host key type '{other}'"))),
    }
}

/// Store types a delete command for `code` may refer to, most specific first.
///
/// The delete command carries no sub-type, so a working-key code matches any
/// working key at the slot.
pub fn delete_candidates(code: &str) -> &'static [KeyType] {
    match code.to_ascii_uppercase().as_str() {
        "01" | "0F" => &[KeyType::Master],
        "06" => &[KeyType::Transport],
        "04" | "05" | "0C" => &[
            KeyType::WorkingPin,
            KeyType::WorkingMac,
            KeyType::WorkingData,
            KeyType::Master,
        ],
        "02" | "03" | "08" | "0B" | "10" => &[KeyType::DukptInitial],
        _ => &[],
    }
}

pub fn algorithm(code: &str) -> KeyAlgorithm {
    match code {
        "00" => KeyAlgorithm::Tdes2Key,
        "01" => KeyAlgorithm::Tdes3Key,
        "02" => KeyAlgorithm::Aes128,
        "03" => KeyAlgorithm::Aes192,
        "04" => KeyAlgorithm::Aes256,
        other => {
            warn!(code = other, "unknown algorithm code, assuming 3-key 3DES");
            KeyAlgorithm::Tdes3Key
        }
    }
}

/// How the key data of an inject command is protected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encryption {
    /// `00`: key in the clear
    Clear,
    /// `01`: encrypted under a KTK or master key already in the PED
    UnderResidentKey,
    /// `02`: encrypted under a KTK, unwrapped by the PED
    UnderTransportKey,
    /// `05`: DUKPT IPEK in the clear
    DukptIpekClear,
    /// `04` (TR-31 key block) and anything else
    Unsupported,
}

impl Encryption {
    pub fn from_code(code: &str) -> Self {
        match code {
            "00" => Encryption::Clear,
            "01" => Encryption::UnderResidentKey,
            "02" => Encryption::UnderTransportKey,
            "05" => Encryption::DukptIpekClear,
            _ => Encryption::Unsupported,
        }
    }
}

/// IPEK length the PED expects for a DUKPT key of `algorithm`.
pub fn ipek_len(algorithm: KeyAlgorithm) -> Option<usize> {
    match algorithm {
        // both 3DES variants derive from a double-length IPEK
        KeyAlgorithm::Tdes2Key | KeyAlgorithm::Tdes3Key => Some(16),
        KeyAlgorithm::Aes128 => Some(16),
        KeyAlgorithm::Aes192 => Some(24),
        KeyAlgorithm::Aes256 => Some(32),
        KeyAlgorithm::Des | KeyAlgorithm::Sm4 => None,
    }
}

/// AES DUKPT takes a 12-byte KSN: the 10-byte host KSN behind two zero bytes.
pub fn device_ksn(ksn: &[u8], algorithm: KeyAlgorithm) -> Vec<u8> {
    if algorithm.is_aes() {
        let mut padded = vec![0u8; 2];
        padded.extend_from_slice(ksn);
        padded
    } else {
        ksn.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_working_key_sub_types() {
        assert_eq!(key_type("05", "01").unwrap(), KeyType::WorkingPin);
        assert_eq!(key_type("04", "02").unwrap(), KeyType::WorkingMac);
        assert_eq!(key_type("0c", "03").unwrap(), KeyType::WorkingData);
        assert_eq!(key_type("05", "09").unwrap(), KeyType::Master);
    }

    #[test]
    fn test_top_level_and_dukpt_codes() {
        assert_eq!(key_type("0F", "00").unwrap(), KeyType::Master);
        assert_eq!(key_type("06", "00").unwrap(), KeyType::Transport);
        for code in ["02", "03", "08", "0B", "10"] {
            assert_eq!(key_type(code, "00").unwrap(), KeyType::DukptInitial);
        }
        assert!(matches!(
            key_type("07", "00"),
            Err(KeyError::UnsupportedKeyType(_))
        ));
    }

    #[test]
    fn test_unknown_algorithm_falls_back() {
        assert_eq!(algorithm("04"), KeyAlgorithm::Aes256);
        assert_eq!(algorithm("9Z"), KeyAlgorithm::Tdes3Key);
    }

    #[test]
    fn test_encryption_codes() {
        assert_eq!(Encryption::from_code("01"), Encryption::UnderResidentKey);
        assert_eq!(Encryption::from_code("04"), Encryption::Unsupported);
        assert_eq!(Encryption::from_code("03"), Encryption::Unsupported);
    }

    #[test]
    fn test_aes_ksn_padding() {
        let ksn = [0xFF; 10];
        assert_eq!(device_ksn(&ksn, KeyAlgorithm::Tdes2Key).len(), 10);
        let padded = device_ksn(&ksn, KeyAlgorithm::Aes128);
        assert_eq!(padded.len(), 12);
        assert_eq!(&padded[..2], &[0, 0]);
    }

    #[test]
    fn test_ipek_lengths() {
        assert_eq!(ipek_len(KeyAlgorithm::Tdes3Key), Some(16));
        assert_eq!(ipek_len(KeyAlgorithm::Aes192), Some(24));
        assert_eq!(ipek_len(KeyAlgorithm::Sm4), None);
    }
}
