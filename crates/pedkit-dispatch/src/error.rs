use pedkit_ped::{KeyError, PedError};
use pedkit_protocol::ErrorCode;
use pedkit_store::StoreError;
use thiserror::Error;

/// Why a key injection was refused.
#[derive(Debug, Error)]
pub enum InjectError {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("{reason}")]
    Rejected { code: ErrorCode, reason: String },

    #[error(transparent)]
    Ped(#[from] PedError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl InjectError {
    pub fn rejected(code: ErrorCode, reason: impl Into<String>) -> Self {
        InjectError::Rejected {
            code,
            reason: reason.into(),
        }
    }

    /// Response code reported to the host.
    pub fn response_code(&self) -> ErrorCode {
        match self {
            InjectError::Key(e) | InjectError::Ped(PedError::Key(e)) => key_error_code(e),
            InjectError::Rejected { code, .. } => *code,
            InjectError::Ped(_) | InjectError::Store(_) => ErrorCode::DeviceIsBusy,
        }
    }
}

fn key_error_code(e: &KeyError) -> ErrorCode {
    match e {
        KeyError::KcvMismatch { .. } => ErrorCode::InvalidKeyChecksum,
        KeyError::TransportKcvMismatch { .. } => ErrorCode::InvalidKtkChecksum,
        _ => ErrorCode::InvalidKeyType,
    }
}
