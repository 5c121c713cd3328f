//! Internal key system selection for encrypted key loads.
//!
//! A PED decrypts an injected key with the key system of the key that
//! protects it. The choice therefore follows the **transport** key's type and
//! algorithm; the destination key's algorithm never enters into it.

use pedkit_core::{KeyAlgorithm, KeyType};

use crate::error::KeyError;

/// Cipher family a key system runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Des,
    Aes,
    Sm4,
}

impl KeyFamily {
    pub fn of(algorithm: KeyAlgorithm) -> Self {
        if algorithm.is_des_family() {
            KeyFamily::Des
        } else if algorithm.is_aes() {
            KeyFamily::Aes
        } else {
            KeyFamily::Sm4
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySystem {
    /// Master/session: a master key protects working keys
    MasterSession(KeyFamily),
    /// Fixed transport key (TMTK) protecting top-level keys
    FixedTransport(KeyFamily),
    Dukpt(KeyFamily),
}

impl KeySystem {
    /// Key system used to unwrap a key protected by a `transport_type` key.
    pub fn for_transport(
        transport_type: KeyType,
        transport_algorithm: KeyAlgorithm,
    ) -> Result<Self, KeyError> {
        let family = KeyFamily::of(transport_algorithm);
        match transport_type {
            KeyType::Master => Ok(KeySystem::MasterSession(family)),
            KeyType::Transport | KeyType::Ktk => Ok(KeySystem::FixedTransport(family)),
            KeyType::DukptInitial | KeyType::DukptWorking => Ok(KeySystem::Dukpt(family)),
            other => Err(KeyError::UnsupportedKeyType(format!(
                "{other} cannot protect other keys"
            ))),
        }
    }

    pub fn family(self) -> KeyFamily {
        match self {
            KeySystem::MasterSession(f) | KeySystem::FixedTransport(f) | KeySystem::Dukpt(f) => f,
        }
    }
}
