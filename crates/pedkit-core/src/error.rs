use thiserror::Error;

pub type PedkitResult<T> = Result<T, PedkitError>;

#[derive(Debug, Error)]
pub enum PedkitError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("unknown {kind}: '{value}'")]
    UnknownCode { kind: &'static str, value: String },

    #[error("invalid key length for {algorithm}: {len} bytes")]
    InvalidKeyLength {
        algorithm: crate::KeyAlgorithm,
        len: usize,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
