//! ANSI X9.24-1 TDES DUKPT.
//!
//! A 10-byte KSN is `key set id ‖ device id ‖ 21-bit transaction counter`.
//! The current transaction key is derived from the IPEK by running the
//! non-reversible key generation process once for each set counter bit,
//! high to low.

use zeroize::Zeroizing;

use crate::cipher::BlockCipher;
use crate::error::{CryptoError, CryptoResult};
use pedkit_core::KeyAlgorithm;

pub const KSN_LEN: usize = 10;
pub const IPEK_LEN: usize = 16;

const COUNTER_BITS: u32 = 21;
const COUNTER_MASK: u64 = (1 << COUNTER_BITS) - 1;
const MAX_ONE_BITS: u32 = 10;
const KEY_MASK: [u8; 8] = [0xC0, 0xC0, 0xC0, 0xC0, 0x00, 0x00, 0x00, 0x00];

/// Which variant of the transaction key an operation uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyVariant {
    #[default]
    Pin,
    Mac,
    Data,
}

impl KeyVariant {
    fn mask(self) -> [u8; IPEK_LEN] {
        let mut m = [0u8; IPEK_LEN];
        let idx = match self {
            KeyVariant::Pin => 7,
            KeyVariant::Mac => 6,
            KeyVariant::Data => 5,
        };
        m[idx] = 0xFF;
        m[idx + 8] = 0xFF;
        m
    }
}

fn parse_ksn(ksn: &[u8]) -> CryptoResult<[u8; KSN_LEN]> {
    ksn.try_into().map_err(|_| {
        CryptoError::InvalidKsn(format!("expected {KSN_LEN} bytes, got {}", ksn.len()))
    })
}

fn parse_ipek(ipek: &[u8]) -> CryptoResult<[u8; IPEK_LEN]> {
    ipek.try_into().map_err(|_| CryptoError::InvalidKeyLength {
        algorithm: KeyAlgorithm::Tdes2Key,
        expected: IPEK_LEN,
        actual: ipek.len(),
    })
}

/// Rightmost 8 bytes of the KSN as an integer.
fn ksn_register(ksn: &[u8; KSN_LEN]) -> u64 {
    let mut r = [0u8; 8];
    r.copy_from_slice(&ksn[2..]);
    u64::from_be_bytes(r)
}

/// 21-bit transaction counter.
pub fn counter(ksn: &[u8]) -> CryptoResult<u32> {
    let ksn = parse_ksn(ksn)?;
    Ok((ksn_register(&ksn) & COUNTER_MASK) as u32)
}

fn des_encrypt(key: &[u8], block: &[u8]) -> CryptoResult<Vec<u8>> {
    BlockCipher::new(KeyAlgorithm::Des, key)?.encrypt_ecb(block)
}

fn xor8(a: &[u8], b: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    for ((o, x), y) in out.iter_mut().zip(a).zip(b) {
        *o = x ^ y;
    }
    out
}

/// Non-reversible key generation process over one 8-byte KSN register.
fn generate_key(key: &[u8; IPEK_LEN], register: &[u8; 8]) -> CryptoResult<[u8; IPEK_LEN]> {
    let (left, right) = key.split_at(8);

    let half = |l: &[u8], r: &[u8]| -> CryptoResult<[u8; 8]> {
        let msg = xor8(r, register);
        let ct = des_encrypt(l, &msg)?;
        Ok(xor8(&ct, r))
    };

    let new_right = half(left, right)?;
    let masked_left = xor8(left, &KEY_MASK);
    let masked_right = xor8(right, &KEY_MASK);
    let new_left = half(&masked_left, &masked_right)?;

    let mut out = [0u8; IPEK_LEN];
    out[..8].copy_from_slice(&new_left);
    out[8..].copy_from_slice(&new_right);
    Ok(out)
}

/// Derive the IPEK from a base derivation key and the initial KSN.
pub fn derive_ipek(bdk: &[u8], ksn: &[u8]) -> CryptoResult<Zeroizing<[u8; IPEK_LEN]>> {
    let bdk = parse_ipek(bdk)?;
    let ksn = parse_ksn(ksn)?;

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&ksn[..8]);
    seed[7] &= 0xE0;

    let mut masked = bdk;
    for (i, b) in masked.iter_mut().enumerate() {
        *b ^= KEY_MASK[i % 8];
    }

    let left = BlockCipher::new(KeyAlgorithm::Tdes2Key, &bdk)?.encrypt_ecb(&seed)?;
    let right = BlockCipher::new(KeyAlgorithm::Tdes2Key, &masked)?.encrypt_ecb(&seed)?;

    let mut ipek = Zeroizing::new([0u8; IPEK_LEN]);
    ipek[..8].copy_from_slice(&left);
    ipek[8..].copy_from_slice(&right);
    Ok(ipek)
}

/// Derive the current transaction key (before any variant) for `ksn`.
pub fn transaction_key(ipek: &[u8], ksn: &[u8]) -> CryptoResult<Zeroizing<[u8; IPEK_LEN]>> {
    let mut key = Zeroizing::new(parse_ipek(ipek)?);
    let ksn = parse_ksn(ksn)?;

    let full = ksn_register(&ksn);
    let count = full & COUNTER_MASK;
    let mut register = full & !COUNTER_MASK;

    let mut bit = 1u64 << (COUNTER_BITS - 1);
    while bit > 0 {
        if count & bit != 0 {
            register |= bit;
            *key = generate_key(&key, &register.to_be_bytes())?;
        }
        bit >>= 1;
    }
    Ok(key)
}

/// Transaction key with the variant mask for `variant` applied.
pub fn working_key(
    ipek: &[u8],
    ksn: &[u8],
    variant: KeyVariant,
) -> CryptoResult<Zeroizing<[u8; IPEK_LEN]>> {
    let mut key = transaction_key(ipek, ksn)?;
    for (k, m) in key.iter_mut().zip(variant.mask()) {
        *k ^= m;
    }
    if variant == KeyVariant::Data {
        // data keys are additionally passed through the variant key itself
        let cipher = BlockCipher::new(KeyAlgorithm::Tdes2Key, key.as_slice())?;
        let left = cipher.encrypt_ecb(&key[..8])?;
        let right = cipher.encrypt_ecb(&key[8..])?;
        key[..8].copy_from_slice(&left);
        key[8..].copy_from_slice(&right);
    }
    Ok(key)
}

/// Advance the KSN to the next usable counter, skipping counters with more
/// than ten one-bits.
pub fn next_ksn(ksn: &[u8]) -> CryptoResult<[u8; KSN_LEN]> {
    let mut out = parse_ksn(ksn)?;
    let register = ksn_register(&out);
    let mut count = register & COUNTER_MASK;
    loop {
        count += 1;
        if count > COUNTER_MASK {
            return Err(CryptoError::CounterExhausted);
        }
        if count.count_ones() <= MAX_ONE_BITS {
            break;
        }
    }
    let next = (register & !COUNTER_MASK) | count;
    out[2..].copy_from_slice(&next.to_be_bytes());
    Ok(out)
}
