use pedkit_core::{KeyAlgorithm, KeyType};
use pedkit_crypto::CryptoError;
use thiserror::Error;

/// Code attached to failures raised in software rather than by a device.
pub const SOFTWARE_FAILURE: i32 = -1;

/// Rejections of a key load or delete.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("no {key_type} transport key at slot {slot}")]
    MissingTransportKey { slot: u32, key_type: KeyType },

    #[error("slot {slot} already holds a {key_type} key")]
    DuplicateSlot { slot: u32, key_type: KeyType },

    #[error("{algorithm} key cannot be {len} bytes")]
    InvalidLength { algorithm: KeyAlgorithm, len: usize },

    #[error("algorithm {0} is not supported by this device")]
    UnsupportedAlgorithm(KeyAlgorithm),

    #[error("key type {0} is not supported here")]
    UnsupportedKeyType(String),

    #[error("key check value mismatch: expected {expected}, computed {actual}")]
    KcvMismatch { expected: String, actual: String },

    #[error("transport key check value mismatch: expected {expected}, stored {actual}")]
    TransportKcvMismatch { expected: String, actual: String },

    #[error("slot {slot} is outside 0..={max}")]
    SlotOutOfRange { slot: u32, max: u32 },

    #[error("device rejected the key operation (code {0})")]
    Hardware(i32),
}

/// Uniform failure taxonomy of PED operations, whatever the hardware family.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PedError {
    #[error("PED operation timed out")]
    Timeout,

    #[error("PED operation cancelled")]
    Cancelled,

    #[error("no {key_type} key at slot {slot}")]
    KeyNotFound { slot: u32, key_type: KeyType },

    #[error("crypto failure (code {code}): {reason}")]
    CryptoFailure { code: i32, reason: String },

    #[error("PED failure (code {code}): {reason}")]
    GenericPedFailure { code: i32, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Key(#[from] KeyError),
}

pub type PedResult<T> = Result<T, PedError>;

impl PedError {
    /// Timeouts and cancellations are ordinary outcomes of interactive entry.
    pub fn is_expected(&self) -> bool {
        matches!(self, PedError::Timeout | PedError::Cancelled)
    }

    pub fn generic(code: i32, reason: impl Into<String>) -> Self {
        PedError::GenericPedFailure {
            code,
            reason: reason.into(),
        }
    }
}

impl From<CryptoError> for PedError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidPin(_) | CryptoError::InvalidPan(_) => {
                PedError::InvalidRequest(e.to_string())
            }
            other => PedError::CryptoFailure {
                code: SOFTWARE_FAILURE,
                reason: other.to_string(),
            },
        }
    }
}

impl From<CryptoError> for KeyError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidKeyLength {
                algorithm, actual, ..
            } => KeyError::InvalidLength {
                algorithm,
                len: actual,
            },
            CryptoError::UnsupportedAlgorithm(alg) => KeyError::UnsupportedAlgorithm(alg),
            _ => KeyError::Hardware(SOFTWARE_FAILURE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_error_converts_into_ped_error() {
        let e: PedError = KeyError::Hardware(7).into();
        assert_eq!(e, PedError::Key(KeyError::Hardware(7)));
        assert!(!e.is_expected());
        assert!(PedError::Cancelled.is_expected());
    }

    #[test]
    fn test_crypto_length_error_maps_to_invalid_length() {
        let e: KeyError = CryptoError::InvalidKeyLength {
            algorithm: KeyAlgorithm::Aes128,
            expected: 16,
            actual: 15,
        }
        .into();
        assert_eq!(
            e,
            KeyError::InvalidLength {
                algorithm: KeyAlgorithm::Aes128,
                len: 15
            }
        );
    }
}
