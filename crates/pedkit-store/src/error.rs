use pedkit_crypto::CryptoError;
use thiserror::Error;

use crate::deletion::DeletionReason;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key {kcv} cannot be deleted: {reason}")]
    DeletionBlocked { kcv: String, reason: DeletionReason },

    #[error("no key record with KCV {0}")]
    NotFound(String),

    #[error("sealed key material needs a wrapping key, none is active")]
    NoWrappingKey,

    #[error("invalid key material: {0}")]
    InvalidMaterial(String),

    #[error("key store lock poisoned")]
    LockPoisoned,

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
