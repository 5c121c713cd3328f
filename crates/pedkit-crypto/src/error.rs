use pedkit_core::KeyAlgorithm;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("algorithm {0} is not supported here")]
    UnsupportedAlgorithm(KeyAlgorithm),

    #[error("{algorithm} needs a {expected}-byte key, got {actual}")]
    InvalidKeyLength {
        algorithm: KeyAlgorithm,
        expected: usize,
        actual: usize,
    },

    #[error("cannot infer an algorithm for a {0}-byte key")]
    UnknownKeyLength(usize),

    #[error("MAC algorithm {0} is not supported here")]
    UnsupportedMac(&'static str),

    #[error("data length {len} is not a multiple of the {block}-byte block")]
    InvalidDataLength { len: usize, block: usize },

    #[error("IV must be {expected} bytes, got {actual}")]
    InvalidIv { expected: usize, actual: usize },

    #[error("components differ in length ({left} vs {right} bytes)")]
    LengthMismatch { left: usize, right: usize },

    #[error("invalid PIN: {0}")]
    InvalidPin(String),

    #[error("invalid PAN: {0}")]
    InvalidPan(String),

    #[error("invalid KSN: {0}")]
    InvalidKsn(String),

    #[error("DUKPT transaction counter exhausted")]
    CounterExhausted,

    #[error("sealing failed: {0}")]
    Seal(String),

    #[error("unsealing failed: wrong key or corrupted record")]
    Open,

    #[error("invalid hex in {0}")]
    InvalidHex(&'static str),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
