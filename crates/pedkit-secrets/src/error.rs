use pedkit_crypto::CryptoError;
use pedkit_store::StoreError;
use thiserror::Error;

pub type KekResult<T> = Result<T, KekError>;

#[derive(Debug, Error)]
pub enum KekError {
    #[error("security element: {0}")]
    SecurityElement(String),

    #[error("no active KEK")]
    NoActiveKek,

    #[error("KEK length must be 16, 24 or 32 bytes (got {0})")]
    InvalidLength(usize),

    /// `restored` is false only when the rollback itself failed.
    #[error("KEK rotation failed ({reason}); previous KEK restored: {restored}")]
    Rotation { restored: bool, reason: String },

    #[error("KEK check value mismatch: expected {expected}, computed {actual}")]
    KcvMismatch { expected: String, actual: String },

    #[error("KEK {kcv} still wraps {sealed} stored keys; rotate instead")]
    StillWrapping { kcv: String, sealed: usize },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
