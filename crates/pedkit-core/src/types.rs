use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PedkitError;
use crate::{KCV_LEN, WIRE_KCV_CHARS};

/// Role of a key inside a PED or the key store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyType {
    Master,
    Transport,
    WorkingPin,
    WorkingMac,
    WorkingData,
    DukptInitial,
    DukptWorking,
    Kek,
    Ktk,
    /// Generic key reconstructed by a custodian ceremony (never slotted)
    CeremonyKey,
}

impl KeyType {
    /// Keys that may be loaded in the clear at provisioning time.
    pub fn is_top_level(self) -> bool {
        matches!(self, KeyType::Master | KeyType::Transport)
    }

    pub fn is_working(self) -> bool {
        matches!(
            self,
            KeyType::WorkingPin | KeyType::WorkingMac | KeyType::WorkingData
        )
    }

    pub fn is_dukpt(self) -> bool {
        matches!(self, KeyType::DukptInitial | KeyType::DukptWorking)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::Master => "MASTER",
            KeyType::Transport => "TRANSPORT",
            KeyType::WorkingPin => "WORKING_PIN",
            KeyType::WorkingMac => "WORKING_MAC",
            KeyType::WorkingData => "WORKING_DATA",
            KeyType::DukptInitial => "DUKPT_INITIAL",
            KeyType::DukptWorking => "DUKPT_WORKING",
            KeyType::Kek => "KEK",
            KeyType::Ktk => "KTK",
            KeyType::CeremonyKey => "CEREMONY_KEY",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = PedkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            KeyType::Master,
            KeyType::Transport,
            KeyType::WorkingPin,
            KeyType::WorkingMac,
            KeyType::WorkingData,
            KeyType::DukptInitial,
            KeyType::DukptWorking,
            KeyType::Kek,
            KeyType::Ktk,
            KeyType::CeremonyKey,
        ];
        all.into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| PedkitError::UnknownCode {
                kind: "key type",
                value: s.to_string(),
            })
    }
}

/// Symmetric algorithm of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    #[serde(rename = "DES")]
    Des,
    #[serde(rename = "3DES_2KEY")]
    Tdes2Key,
    #[serde(rename = "3DES_3KEY")]
    Tdes3Key,
    #[serde(rename = "AES_128")]
    Aes128,
    #[serde(rename = "AES_192")]
    Aes192,
    #[serde(rename = "AES_256")]
    Aes256,
    #[serde(rename = "SM4")]
    Sm4,
}

impl KeyAlgorithm {
    /// Canonical key length in bytes.
    pub fn key_len(self) -> usize {
        match self {
            KeyAlgorithm::Des => 8,
            KeyAlgorithm::Tdes2Key | KeyAlgorithm::Aes128 | KeyAlgorithm::Sm4 => 16,
            KeyAlgorithm::Tdes3Key | KeyAlgorithm::Aes192 => 24,
            KeyAlgorithm::Aes256 => 32,
        }
    }

    pub fn block_size(self) -> usize {
        if self.is_des_family() {
            8
        } else {
            16
        }
    }

    pub fn is_des_family(self) -> bool {
        matches!(
            self,
            KeyAlgorithm::Des | KeyAlgorithm::Tdes2Key | KeyAlgorithm::Tdes3Key
        )
    }

    pub fn is_aes(self) -> bool {
        matches!(
            self,
            KeyAlgorithm::Aes128 | KeyAlgorithm::Aes192 | KeyAlgorithm::Aes256
        )
    }

    /// Infer the algorithm from a raw key length, preferring DES family for
    /// the ambiguous 16- and 24-byte sizes.
    pub fn infer_from_len(len: usize) -> Option<Self> {
        match len {
            8 => Some(KeyAlgorithm::Des),
            16 => Some(KeyAlgorithm::Tdes2Key),
            24 => Some(KeyAlgorithm::Tdes3Key),
            32 => Some(KeyAlgorithm::Aes256),
            _ => None,
        }
    }

    /// Check `len` against this algorithm's key length.
    pub fn check_len(self, len: usize) -> Result<(), PedkitError> {
        if len == self.key_len() {
            Ok(())
        } else {
            Err(PedkitError::InvalidKeyLength {
                algorithm: self,
                len,
            })
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KeyAlgorithm::Des => "DES",
            KeyAlgorithm::Tdes2Key => "3DES_2KEY",
            KeyAlgorithm::Tdes3Key => "3DES_3KEY",
            KeyAlgorithm::Aes128 => "AES_128",
            KeyAlgorithm::Aes192 => "AES_192",
            KeyAlgorithm::Aes256 => "AES_256",
            KeyAlgorithm::Sm4 => "SM4",
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyAlgorithm {
    type Err = PedkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        match normalized.as_str() {
            "DES" => Ok(KeyAlgorithm::Des),
            "3DES_2KEY" | "TDES2" | "3DES112" => Ok(KeyAlgorithm::Tdes2Key),
            "3DES_3KEY" | "TDES3" | "3DES168" | "3DES" => Ok(KeyAlgorithm::Tdes3Key),
            "AES_128" | "AES128" => Ok(KeyAlgorithm::Aes128),
            "AES_192" | "AES192" => Ok(KeyAlgorithm::Aes192),
            "AES_256" | "AES256" => Ok(KeyAlgorithm::Aes256),
            "SM4" => Ok(KeyAlgorithm::Sm4),
            _ => Err(PedkitError::UnknownCode {
                kind: "key algorithm",
                value: s.to_string(),
            }),
        }
    }
}

/// Lifecycle status of a key record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyStatus {
    Active,
    Inactive,
    Deleting,
    Successful,
    Failed,
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyStatus::Active => "ACTIVE",
            KeyStatus::Inactive => "INACTIVE",
            KeyStatus::Deleting => "DELETING",
            KeyStatus::Successful => "SUCCESSFUL",
            KeyStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Key Check Value: first three bytes of a zero block encrypted under a key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Kcv([u8; KCV_LEN]);

impl Kcv {
    pub fn from_bytes(bytes: [u8; KCV_LEN]) -> Self {
        Self(bytes)
    }

    /// Take the first three bytes of an encrypted zero block.
    pub fn from_block(block: &[u8]) -> Option<Self> {
        let head = block.get(..KCV_LEN)?;
        let mut bytes = [0u8; KCV_LEN];
        bytes.copy_from_slice(head);
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KCV_LEN] {
        &self.0
    }

    /// Six upper-case hex characters.
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    /// The four-character checksum used by the host protocol.
    pub fn to_wire(&self) -> String {
        self.to_hex()[..WIRE_KCV_CHARS].to_string()
    }
}

impl fmt::Display for Kcv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Kcv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kcv({})", self.to_hex())
    }
}

impl FromStr for Kcv {
    type Err = PedkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = crate::decode_hex(s)?;
        if bytes.len() != KCV_LEN {
            return Err(PedkitError::InvalidHex(format!(
                "KCV must be {} hex chars, got '{s}'",
                KCV_LEN * 2
            )));
        }
        Kcv::from_block(&bytes).ok_or_else(|| PedkitError::InvalidHex(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_type_string_roundtrip() {
        for t in [KeyType::WorkingPin, KeyType::CeremonyKey, KeyType::Ktk] {
            assert_eq!(t.as_str().parse::<KeyType>().unwrap(), t);
        }
        assert!("NOPE".parse::<KeyType>().is_err());
    }

    #[test]
    fn algorithm_inference_prefers_des_family() {
        assert_eq!(KeyAlgorithm::infer_from_len(16), Some(KeyAlgorithm::Tdes2Key));
        assert_eq!(KeyAlgorithm::infer_from_len(24), Some(KeyAlgorithm::Tdes3Key));
        assert_eq!(KeyAlgorithm::infer_from_len(32), Some(KeyAlgorithm::Aes256));
        assert_eq!(KeyAlgorithm::infer_from_len(12), None);
    }

    #[test]
    fn algorithm_serde_names() {
        let json = serde_json_like(KeyAlgorithm::Tdes2Key);
        assert_eq!(json, "3DES_2KEY");
        assert_eq!("aes-256".parse::<KeyAlgorithm>().unwrap(), KeyAlgorithm::Aes256);
    }

    fn serde_json_like(alg: KeyAlgorithm) -> String {
        #[derive(Serialize)]
        struct Wrap {
            a: KeyAlgorithm,
        }
        let s = toml::to_string(&Wrap { a: alg }).unwrap();
        s.trim().trim_start_matches("a = ").trim_matches('"').to_string()
    }

    #[test]
    fn kcv_hex_and_wire() {
        let kcv = Kcv::from_bytes([0x0a, 0xbc, 0xde]);
        assert_eq!(kcv.to_hex(), "0ABCDE");
        assert_eq!(kcv.to_wire(), "0ABC");
        assert_eq!("0abcde".parse::<Kcv>().unwrap(), kcv);
        assert!("0ABC".parse::<Kcv>().is_err());
    }
}
