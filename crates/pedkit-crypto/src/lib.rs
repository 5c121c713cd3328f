//! pedkit-crypto: symmetric primitives behind key injection and storage
//!
//! ```text
//! KCV        E(key, 0^block)[0..3]            DES-EDE / AES ECB
//! Component  K = C1 ⊕ C2 (⊕ C3)               ceremony accumulator
//! Seal       AES-256-GCM(KEK, IV96) → ct|iv|tag   records at rest
//! PIN block  ISO 9564 formats 0, 1, 3         simulated PED
//! MAC        ISO 9797-1 M1/M2, ANSI X9.19
//! DUKPT      ANSI X9.24-1 TDES (IPEK, NRKGP, variants, KSN counter)
//! ```

pub mod cipher;
pub mod component;
pub mod dukpt;
pub mod error;
pub mod kcv;
pub mod mac;
pub mod pinblock;
pub mod seal;

pub use cipher::{BlockCipher, CipherMode};
pub use component::{xor, xor_into};
pub use error::{CryptoError, CryptoResult};
pub use kcv::{compute_kcv, matches_checksum};
pub use mac::MacAlgorithm;
pub use pinblock::PinBlockFormat;
pub use seal::{open, seal, SealedMaterial, WrappingKey};

/// Size of the at-rest wrapping key (AES-256)
pub const WRAPPING_KEY_SIZE: usize = 32;

/// AES-GCM IV size used for sealing
pub const IV_SIZE: usize = 12;

/// AES-GCM tag size
pub const TAG_SIZE: usize = 16;

/// Fill a fresh buffer with OS randomness.
pub fn random_bytes(n: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut buf = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}
