//! Key Check Value: the first three bytes of a zero block encrypted under the key.

use pedkit_core::{Kcv, KeyAlgorithm};

use crate::cipher::BlockCipher;
use crate::error::{CryptoError, CryptoResult};

/// Compute the KCV of `key`.
///
/// With `algorithm` unset the algorithm is inferred from the key length
/// (8 DES, 16 2-key 3DES, 24 3-key 3DES, 32 AES-256). Pass it explicitly for
/// AES-128/192 keys, whose lengths collide with the DES family.
pub fn compute_kcv(key: &[u8], algorithm: Option<KeyAlgorithm>) -> CryptoResult<Kcv> {
    let cipher = match algorithm {
        Some(alg) => BlockCipher::new(alg, key)?,
        None => BlockCipher::from_key(key)?,
    };
    let zero = vec![0u8; cipher.block_size()];
    let block = cipher.encrypt_ecb(&zero)?;
    Kcv::from_block(&block).ok_or(CryptoError::InvalidDataLength {
        len: block.len(),
        block: cipher.block_size(),
    })
}

/// Case-insensitive comparison of a computed KCV against a received
/// checksum, which may be the 4-character wire form or the full 6 chars.
pub fn matches_checksum(kcv: &Kcv, checksum: &str) -> bool {
    let checksum = checksum.trim();
    !checksum.is_empty()
        && checksum.len() <= 6
        && kcv.to_hex()[..checksum.len()].eq_ignore_ascii_case(checksum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tdes_two_key_kcv() {
        // Widely published check value for this test key
        let key = hex::decode("0123456789ABCDEFFEDCBA9876543210").unwrap();
        let kcv = compute_kcv(&key, None).unwrap();
        assert_eq!(kcv.to_hex(), "08D7B4");
    }

    #[test]
    fn test_des_kcv_matches_two_key_with_repeated_halves() {
        let half = hex::decode("0123456789ABCDEF").unwrap();
        let mut full = half.clone();
        full.extend_from_slice(&half);
        assert_eq!(
            compute_kcv(&half, None).unwrap(),
            compute_kcv(&full, None).unwrap()
        );
    }

    #[test]
    fn test_aes_kcv_uses_sixteen_byte_block() {
        // FIPS-197 C.1 key over a zero block: first 3 bytes of c6a13b37878f5b826f4f8162a1c8d879
        let key = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let kcv = compute_kcv(&key, Some(KeyAlgorithm::Aes128)).unwrap();
        assert_eq!(kcv.to_hex(), "C6A13B");
        // Same bytes read as 3DES give a different check value
        assert_ne!(compute_kcv(&key, None).unwrap(), kcv);
    }

    #[test]
    fn test_unknown_length_is_rejected() {
        assert_eq!(
            compute_kcv(&[0u8; 20], None),
            Err(CryptoError::UnknownKeyLength(20))
        );
    }

    #[test]
    fn test_checksum_matching() {
        let kcv: Kcv = "08D7B4".parse().unwrap();
        assert!(matches_checksum(&kcv, "08d7"));
        assert!(matches_checksum(&kcv, "08D7B4"));
        assert!(!matches_checksum(&kcv, "08D8"));
        assert!(!matches_checksum(&kcv, ""));
        assert!(!matches_checksum(&kcv, "08D7B400"));
    }
}
