//! At-rest sealing of key material under the active wrapping key.
//!
//! Sealed record layout (all hex, stored as separate fields):
//! ```text
//! ciphertext : AES-256-GCM(KEK, iv, plaintext) without the tag
//! iv         : 12 random bytes
//! tag        : 16-byte GCM tag
//! ```

use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit, Nonce};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{CryptoError, CryptoResult};
use crate::{random_bytes, IV_SIZE, TAG_SIZE, WRAPPING_KEY_SIZE};

/// The 256-bit key that seals stored key material. Zeroized on drop.
#[derive(Clone)]
pub struct WrappingKey {
    bytes: [u8; WRAPPING_KEY_SIZE],
}

impl WrappingKey {
    pub fn from_bytes(bytes: [u8; WRAPPING_KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Accepts only exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; WRAPPING_KEY_SIZE] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                algorithm: pedkit_core::KeyAlgorithm::Aes256,
                expected: WRAPPING_KEY_SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self::from_bytes(arr))
    }

    pub fn as_bytes(&self) -> &[u8; WRAPPING_KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for WrappingKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for WrappingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappingKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedMaterial {
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
}

/// Seal `plaintext` under `key` with a fresh random IV.
pub fn seal(key: &WrappingKey, plaintext: &[u8]) -> CryptoResult<SealedMaterial> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let iv = random_bytes(IV_SIZE);
    let nonce = Nonce::from_slice(&iv);

    let mut out = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::Seal(e.to_string()))?;

    // aes-gcm appends the tag to the ciphertext
    let tag = out.split_off(out.len() - TAG_SIZE);
    Ok(SealedMaterial {
        ciphertext: hex::encode_upper(&out),
        iv: hex::encode_upper(&iv),
        tag: hex::encode_upper(&tag),
    })
}

/// Open sealed material. The plaintext is zeroized when dropped.
pub fn open(key: &WrappingKey, sealed: &SealedMaterial) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let mut ct =
        hex::decode(&sealed.ciphertext).map_err(|_| CryptoError::InvalidHex("ciphertext"))?;
    let iv = hex::decode(&sealed.iv).map_err(|_| CryptoError::InvalidHex("iv"))?;
    let tag = hex::decode(&sealed.tag).map_err(|_| CryptoError::InvalidHex("tag"))?;

    if iv.len() != IV_SIZE {
        return Err(CryptoError::InvalidIv {
            expected: IV_SIZE,
            actual: iv.len(),
        });
    }
    if tag.len() != TAG_SIZE {
        return Err(CryptoError::Open);
    }

    ct.extend_from_slice(&tag);
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&iv), ct.as_ref())
        .map_err(|_| {
            tracing::debug!(ciphertext_len = sealed.ciphertext.len() / 2, "GCM tag check failed");
            CryptoError::Open
        })?;
    Ok(Zeroizing::new(plaintext))
}

/// Re-seal material from one wrapping key to another.
pub fn reseal(
    old: &WrappingKey,
    new: &WrappingKey,
    sealed: &SealedMaterial,
) -> CryptoResult<SealedMaterial> {
    let plaintext = open(old, sealed)?;
    seal(new, &plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(b: u8) -> WrappingKey {
        WrappingKey::from_bytes([b; WRAPPING_KEY_SIZE])
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let material = hex::decode("0123456789ABCDEFFEDCBA9876543210").unwrap();
        let sealed = seal(&key(7), &material).unwrap();

        assert_eq!(sealed.iv.len(), IV_SIZE * 2);
        assert_eq!(sealed.tag.len(), TAG_SIZE * 2);
        assert_eq!(sealed.ciphertext.len(), material.len() * 2);
        assert_eq!(open(&key(7), &sealed).unwrap().as_slice(), material.as_slice());
    }

    #[test]
    fn test_fresh_iv_per_seal() {
        let a = seal(&key(1), b"same").unwrap();
        let b = seal(&key(1), b"same").unwrap();
        assert_ne!(a.iv, b.iv);
    }

    #[test]
    fn test_wrong_key_and_tamper_fail() {
        let mut sealed = seal(&key(1), b"secret key bytes").unwrap();
        assert_eq!(open(&key(2), &sealed).err(), Some(CryptoError::Open));

        let flipped = if &sealed.tag[0..2] == "00" { "01" } else { "00" };
        sealed.tag.replace_range(0..2, flipped);
        assert_eq!(open(&key(1), &sealed).err(), Some(CryptoError::Open));
    }

    #[test]
    fn test_reseal_moves_between_keys() {
        let sealed = seal(&key(1), b"material").unwrap();
        let moved = reseal(&key(1), &key(2), &sealed).unwrap();
        assert!(open(&key(1), &moved).is_err());
        assert_eq!(open(&key(2), &moved).unwrap().as_slice(), b"material");
    }

    #[test]
    fn test_wrapping_key_length_enforced() {
        assert!(WrappingKey::from_slice(&[0u8; 24]).is_err());
        assert!(WrappingKey::from_slice(&[0u8; 32]).is_ok());
    }

    #[test]
    fn test_sealed_fields_survive_json() {
        let sealed = seal(&key(3), b"stored").unwrap();
        let json = serde_json::to_value(&sealed).unwrap();
        assert_eq!(json["iv"].as_str().unwrap().len(), IV_SIZE * 2);
        let back: SealedMaterial = serde_json::from_value(json).unwrap();
        assert_eq!(open(&key(3), &back).unwrap().as_slice(), b"stored");
    }

    #[test]
    fn test_debug_redacts() {
        assert!(format!("{:?}", key(9)).contains("REDACTED"));
    }
}
