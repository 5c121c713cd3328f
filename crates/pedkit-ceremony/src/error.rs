use pedkit_crypto::CryptoError;
use pedkit_secrets::KekError;
use pedkit_store::StoreError;
use thiserror::Error;

use crate::session::CeremonyState;

pub type CeremonyResult<T> = Result<T, CeremonyError>;

#[derive(Debug, Error)]
pub enum CeremonyError {
    #[error("ceremony is {actual:?}, operation needs {expected:?}")]
    InvalidState {
        expected: CeremonyState,
        actual: CeremonyState,
    },

    #[error("a ceremony needs 2 or 3 custodians (got {0})")]
    InvalidCustodians(u8),

    #[error("component is not valid hex: {0}")]
    InvalidHex(String),

    #[error("component must be {expected} hex characters, got {actual}")]
    WrongLength { expected: usize, actual: usize },

    #[error("{received} of {needed} components received")]
    Incomplete { received: u8, needed: u8 },

    #[error("operational keys need an active storage KEK; run a KEK ceremony first")]
    NoStorageKek,

    #[error("custodian took too long; ceremony cancelled")]
    Expired,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("KEK error: {0}")]
    Kek(#[from] KekError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}
