//! Block-cipher MACs: ISO 9797-1 algorithm 1 with padding methods 1 and 2,
//! and the ANSI X9.19 retail MAC.

use pedkit_core::KeyAlgorithm;

use crate::cipher::BlockCipher;
use crate::error::{CryptoError, CryptoResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MacAlgorithm {
    /// CBC-MAC, zero padding
    #[default]
    Iso9797M1,
    /// CBC-MAC, `0x80` then zero padding
    Iso9797M2,
    /// Single-DES CBC with a triple-DES final block
    X919,
    CmacAes,
    UnionPay,
}

impl MacAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            MacAlgorithm::Iso9797M1 => "ISO9797_M1",
            MacAlgorithm::Iso9797M2 => "ISO9797_M2",
            MacAlgorithm::X919 => "X9_19",
            MacAlgorithm::CmacAes => "CMAC_AES",
            MacAlgorithm::UnionPay => "UNIONPAY",
        }
    }
}

fn pad_method1(data: &[u8], block: usize) -> Vec<u8> {
    let mut out = data.to_vec();
    let rem = out.len() % block;
    if out.is_empty() || rem != 0 {
        out.resize(out.len() + (block - rem), 0);
    }
    out
}

fn pad_method2(data: &[u8], block: usize) -> Vec<u8> {
    let mut out = data.to_vec();
    out.push(0x80);
    let rem = out.len() % block;
    if rem != 0 {
        out.resize(out.len() + (block - rem), 0);
    }
    out
}

fn last_block(cipher: &BlockCipher, padded: &[u8]) -> CryptoResult<Vec<u8>> {
    let ct = cipher.encrypt_cbc(None, padded)?;
    let block = cipher.block_size();
    Ok(ct[ct.len() - block..].to_vec())
}

/// Compute a MAC over `data` with `key`.
pub fn calculate(
    mac: MacAlgorithm,
    key_algorithm: KeyAlgorithm,
    key: &[u8],
    data: &[u8],
) -> CryptoResult<Vec<u8>> {
    match mac {
        MacAlgorithm::Iso9797M1 => {
            let cipher = BlockCipher::new(key_algorithm, key)?;
            last_block(&cipher, &pad_method1(data, cipher.block_size()))
        }
        MacAlgorithm::Iso9797M2 => {
            let cipher = BlockCipher::new(key_algorithm, key)?;
            last_block(&cipher, &pad_method2(data, cipher.block_size()))
        }
        MacAlgorithm::X919 => x919(key, data),
        MacAlgorithm::CmacAes | MacAlgorithm::UnionPay => {
            Err(CryptoError::UnsupportedMac(mac.name()))
        }
    }
}

fn x919(key: &[u8], data: &[u8]) -> CryptoResult<Vec<u8>> {
    if key.len() != 16 && key.len() != 24 {
        return Err(CryptoError::InvalidKeyLength {
            algorithm: KeyAlgorithm::Tdes2Key,
            expected: 16,
            actual: key.len(),
        });
    }
    let k1 = BlockCipher::new(KeyAlgorithm::Des, &key[..8])?;
    let k2 = BlockCipher::new(KeyAlgorithm::Des, &key[8..16])?;

    let chained = last_block(&k1, &pad_method1(data, 8))?;
    let mid = k2.decrypt_ecb(&chained)?;
    k1.encrypt_ecb(&mid)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789ABCDEFFEDCBA9876543210";

    fn key() -> Vec<u8> {
        hex::decode(KEY).unwrap()
    }

    #[test]
    fn test_padding_methods() {
        assert_eq!(pad_method1(&[], 8), vec![0u8; 8]);
        assert_eq!(pad_method1(&[1; 8], 8), vec![1u8; 8]);
        assert_eq!(pad_method2(&[1; 8], 8).len(), 16);
        assert_eq!(pad_method2(&[1; 3], 8), vec![1, 1, 1, 0x80, 0, 0, 0, 0]);
    }

    #[test]
    fn test_iso9797_m1_single_block_is_ecb() {
        let data = [0x11u8; 8];
        let mac =
            calculate(MacAlgorithm::Iso9797M1, KeyAlgorithm::Tdes2Key, &key(), &data).unwrap();
        let ecb = BlockCipher::new(KeyAlgorithm::Tdes2Key, &key())
            .unwrap()
            .encrypt_ecb(&data)
            .unwrap();
        assert_eq!(mac, ecb);
    }

    #[test]
    fn test_x919_known_answer() {
        let data = b"4E6F77206973207468652074696D6520";
        let mac = calculate(MacAlgorithm::X919, KeyAlgorithm::Tdes2Key, &key(), data).unwrap();
        assert_eq!(hex::encode_upper(mac), X919_EXPECTED);
    }

    #[test]
    fn test_x919_differs_from_full_tdes_cbc() {
        let data = [0x5Au8; 24];
        let retail =
            calculate(MacAlgorithm::X919, KeyAlgorithm::Tdes2Key, &key(), &data).unwrap();
        let full =
            calculate(MacAlgorithm::Iso9797M1, KeyAlgorithm::Tdes2Key, &key(), &data).unwrap();
        assert_ne!(retail, full);
    }

    #[test]
    fn test_unsupported_modes() {
        assert_eq!(
            calculate(MacAlgorithm::CmacAes, KeyAlgorithm::Aes128, &[0u8; 16], b"x"),
            Err(CryptoError::UnsupportedMac("CMAC_AES"))
        );
    }

    // Cross-checked against an independent DES implementation
    const X919_EXPECTED: &str = "31DAA6B9C6885064";
}
