use pedkit_core::{KeyAlgorithm, KeyStatus, KeyType};
use pedkit_crypto::SealedMaterial;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Which key-encryption role a record holds. At most one active record
/// holds each of `Storage` and `Transport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KekRole {
    #[default]
    None,
    /// Wraps stored key material (the KEK)
    Storage,
    /// Protects keys on their way into a PED (the KTK)
    Transport,
}

/// Key bytes as persisted
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum KeyMaterial {
    /// Written before a wrapping key existed
    Plain { hex: String },
    /// AES-256-GCM under the active wrapping key
    Sealed(SealedMaterial),
}

impl KeyMaterial {
    pub fn plain(bytes: &[u8]) -> Self {
        KeyMaterial::Plain {
            hex: hex::encode_upper(bytes),
        }
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self, KeyMaterial::Sealed(_))
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyMaterial::Plain { hex } => write!(f, "Plain(<{} bytes>)", hex.len() / 2),
            KeyMaterial::Sealed(s) => write!(f, "Sealed(<{} bytes>)", s.ciphertext.len() / 2),
        }
    }
}

/// One key known to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub id: Uuid,
    /// PED slot; absent for ceremony keys and KEK storage records
    pub slot: Option<u32>,
    pub key_type: KeyType,
    pub algorithm: KeyAlgorithm,
    /// Six upper-case hex characters, unique across records
    pub kcv: String,
    #[serde(default)]
    pub material: Option<KeyMaterial>,
    pub status: KeyStatus,
    #[serde(default)]
    pub kek_role: KekRole,
    #[serde(default)]
    pub label: Option<String>,
    /// Unix timestamp (seconds)
    pub created_at: u64,
}

impl KeyRecord {
    pub fn is_kek_storage(&self) -> bool {
        self.kek_role == KekRole::Storage
    }

    pub fn is_ktk(&self) -> bool {
        self.kek_role == KekRole::Transport
    }

    /// The KEK currently wrapping stored material.
    pub fn is_active_kek(&self) -> bool {
        self.is_kek_storage() && self.status == KeyStatus::Active
    }

    /// The KTK hosts inject under.
    pub fn is_active_ktk(&self) -> bool {
        self.is_ktk() && !matches!(self.status, KeyStatus::Inactive | KeyStatus::Failed)
    }
}

/// Input of [`KeyStore::record_injection`](crate::KeyStore::record_injection).
pub struct NewKey {
    pub slot: Option<u32>,
    pub key_type: KeyType,
    pub algorithm: KeyAlgorithm,
    pub kcv: String,
    pub material: Option<Zeroizing<Vec<u8>>>,
    pub status: KeyStatus,
    pub kek_role: KekRole,
    pub label: Option<String>,
}

impl NewKey {
    pub fn new(key_type: KeyType, algorithm: KeyAlgorithm, kcv: impl Into<String>) -> Self {
        Self {
            slot: None,
            key_type,
            algorithm,
            kcv: kcv.into(),
            material: None,
            status: KeyStatus::Active,
            kek_role: KekRole::None,
            label: None,
        }
    }

    pub fn slot(mut self, slot: u32) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn material(mut self, bytes: &[u8]) -> Self {
        self.material = Some(Zeroizing::new(bytes.to_vec()));
        self
    }

    pub fn status(mut self, status: KeyStatus) -> Self {
        self.status = status;
        self
    }

    pub fn role(mut self, role: KekRole) -> Self {
        self.kek_role = role;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl std::fmt::Debug for NewKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewKey")
            .field("slot", &self.slot)
            .field("key_type", &self.key_type)
            .field("algorithm", &self.algorithm)
            .field("kcv", &self.kcv)
            .field("material", &self.material.as_ref().map(|_| "[REDACTED]"))
            .field("status", &self.status)
            .field("kek_role", &self.kek_role)
            .finish()
    }
}

/// Canonical form of a KCV used as the store key.
pub fn normalize_kcv(kcv: &str) -> String {
    kcv.trim().to_ascii_uppercase()
}
