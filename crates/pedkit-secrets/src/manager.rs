//! KEK lifecycle.
//!
//! Install flow (shared by generate, rotate and ceremony-assembled KEKs):
//!   1. Compute the KCV of the new key
//!   2. Store the raw key as `kek-<KCV>` in the security element
//!   3. Point `active-kek` at the new KCV
//!   4. Flag the store record as the active KEK (previous holder goes INACTIVE)
//!   5. Re-seal every sealed record from the old wrapping key to the new one
//!   6. Drop the old key from the security element
//!
//! Any failure in steps 2-5 restores the previous pointer, flag and status and
//! removes the new secret before the error is returned.

use std::sync::Arc;

use pedkit_core::{KeyAlgorithm, KeyStatus, KeyType};
use pedkit_crypto::{compute_kcv, random_bytes, WrappingKey};
use pedkit_store::{KekRole, KeyRecord, KeyStore, NewKey, WrappingKeySource};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

use crate::element::{self, names, SecurityElement};
use crate::error::{KekError, KekResult};

// ── Active wrapping key ──────────────────────────────────────────────────────

/// Reads the active KEK out of the security element on every call.
///
/// Only an AES-256 KEK can seal material; a 3DES KEK yields `None`.
#[derive(Clone)]
pub struct ActiveKek {
    element: Arc<dyn SecurityElement>,
}

impl ActiveKek {
    pub fn new(element: Arc<dyn SecurityElement>) -> Self {
        Self { element }
    }

    /// KCV of the active KEK, if one is installed.
    pub fn kcv(&self) -> anyhow::Result<Option<String>> {
        Ok(self
            .element
            .load(names::ACTIVE_KEK)?
            .map(|s| s.expose_secret().to_string()))
    }

    fn raw(&self) -> anyhow::Result<Option<Zeroizing<Vec<u8>>>> {
        match self.kcv()? {
            Some(kcv) => element::load_bytes(self.element.as_ref(), &names::kek(&kcv)),
            None => Ok(None),
        }
    }
}

impl WrappingKeySource for ActiveKek {
    fn wrapping_key(&self) -> anyhow::Result<Option<WrappingKey>> {
        match self.raw()? {
            Some(raw) if raw.len() == pedkit_crypto::WRAPPING_KEY_SIZE => {
                Ok(Some(WrappingKey::from_slice(&raw)?))
            }
            _ => Ok(None),
        }
    }
}

// ── Manager ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct KekStatus {
    pub element_available: bool,
    /// KCV in the `active-kek` pointer
    pub pointer: Option<String>,
    pub active: Option<KeyRecord>,
    /// Whether stored material is being sealed
    pub wraps: bool,
    pub sealed_records: usize,
    pub plain_records: usize,
}

/// What an install replaced, kept for rollback.
struct Previous {
    pointer: Option<String>,
    record: Option<KeyRecord>,
    wrapping: Option<WrappingKey>,
}

pub struct KekManager {
    element: Arc<dyn SecurityElement>,
    active: ActiveKek,
    store: Arc<KeyStore>,
}

impl KekManager {
    pub fn new(element: Arc<dyn SecurityElement>, store: Arc<KeyStore>) -> Self {
        Self {
            active: ActiveKek::new(element.clone()),
            element,
            store,
        }
    }

    pub fn active_wrapping_key(&self) -> KekResult<Option<WrappingKey>> {
        Ok(self.active.wrapping_key()?)
    }

    pub fn has_active_kek(&self) -> KekResult<bool> {
        Ok(self.store.current_kek()?.is_some())
    }

    /// Generate and install a random KEK of 16, 24 or 32 bytes.
    pub fn generate(&self, length: usize) -> KekResult<KeyRecord> {
        let algorithm = algorithm_for_length(length)?;
        let key = Zeroizing::new(random_bytes(length));
        let record = self.install(&key, algorithm, None)?;
        info!(kcv = %record.kcv, %algorithm, "KEK generated");
        Ok(record)
    }

    /// Replace the active KEK with a fresh one and re-seal stored material.
    pub fn rotate(&self, length: usize) -> KekResult<KeyRecord> {
        let old = self.store.current_kek()?.ok_or(KekError::NoActiveKek)?;
        let record = self.generate(length)?;
        info!(old = %old.kcv, new = %record.kcv, "KEK rotated");
        Ok(record)
    }

    /// Install a KEK assembled in a key ceremony. The ceremony record already
    /// exists in the store; it takes over the KEK flag.
    pub fn install_ceremony_kek(&self, key: &[u8], kcv: &str) -> KekResult<KeyRecord> {
        let algorithm = algorithm_for_length(key.len())?;
        let record = self.install(key, algorithm, Some(kcv))?;
        info!(kcv = %record.kcv, "ceremony KEK installed");
        Ok(record)
    }

    /// Retire a KEK that no longer wraps anything.
    pub fn mark_inactive(&self, kcv: &str) -> KekResult<()> {
        let kcv = pedkit_store::normalize_kcv(kcv);
        if self.active.kcv()?.as_deref() == Some(kcv.as_str()) {
            let sealed = self.count_material()?.0;
            if sealed > 0 && self.active_wrapping_key()?.is_some() {
                return Err(KekError::StillWrapping { kcv, sealed });
            }
            self.element.delete(names::ACTIVE_KEK)?;
        }
        self.store.remove_kek_flag(&kcv)?;
        self.store.update_status(&kcv, KeyStatus::Inactive)?;
        info!(kcv = %kcv, "KEK marked inactive");
        Ok(())
    }

    pub fn status(&self) -> KekResult<KekStatus> {
        let (sealed_records, plain_records) = self.count_material()?;
        Ok(KekStatus {
            element_available: self.element.is_available(),
            pointer: self.active.kcv()?,
            active: self.store.current_kek()?,
            wraps: self.active_wrapping_key()?.is_some(),
            sealed_records,
            plain_records,
        })
    }

    fn count_material(&self) -> KekResult<(usize, usize)> {
        let mut sealed = 0;
        let mut plain = 0;
        for record in self.store.list_all()? {
            match &record.material {
                Some(m) if m.is_sealed() => sealed += 1,
                Some(_) => plain += 1,
                None => {}
            }
        }
        Ok((sealed, plain))
    }

    // ── Install / rollback ───────────────────────────────────────────────────

    fn install(
        &self,
        key: &[u8],
        algorithm: KeyAlgorithm,
        existing_kcv: Option<&str>,
    ) -> KekResult<KeyRecord> {
        let kcv = compute_kcv(key, Some(algorithm))?.to_hex();
        if let Some(expected) = existing_kcv {
            if !pedkit_core::kcv_prefix_matches(&kcv, expected) {
                return Err(KekError::KcvMismatch {
                    expected: expected.to_string(),
                    actual: kcv,
                });
            }
        }

        let previous = Previous {
            pointer: self.active.kcv()?,
            record: self.store.current_kek()?,
            wrapping: self.active.wrapping_key()?,
        };
        let had_record = self.store.exists_with_kcv(&kcv)?;

        match self.switch_to(key, algorithm, &kcv, had_record, &previous) {
            Ok(record) => {
                if let Some(old) = previous.pointer.as_deref().filter(|old| *old != kcv) {
                    if let Err(e) = self.element.delete(&names::kek(old)) {
                        warn!(kcv = old, "failed to drop retired KEK from security element: {e}");
                    }
                }
                Ok(record)
            }
            Err(e) => {
                let reason = e.to_string();
                error!(kcv = %kcv, "KEK install failed, rolling back: {reason}");
                let restored = match self.rollback(&kcv, had_record, &previous) {
                    Ok(()) => true,
                    Err(rollback) => {
                        error!(kcv = %kcv, "KEK rollback failed: {rollback}");
                        false
                    }
                };
                Err(KekError::Rotation { restored, reason })
            }
        }
    }

    fn switch_to(
        &self,
        key: &[u8],
        algorithm: KeyAlgorithm,
        kcv: &str,
        had_record: bool,
        previous: &Previous,
    ) -> KekResult<KeyRecord> {
        element::store_bytes(self.element.as_ref(), &names::kek(kcv), key)?;
        self.element
            .store(names::ACTIVE_KEK, &SecretString::from(kcv.to_string()))?;

        let record = if had_record {
            self.store.set_as_kek(kcv)?;
            self.store
                .get_by_kcv(kcv)?
                .ok_or_else(|| pedkit_store::StoreError::NotFound(kcv.to_string()))?
        } else {
            self.store.record_injection(
                NewKey::new(KeyType::Kek, algorithm, kcv)
                    .status(KeyStatus::Active)
                    .role(KekRole::Storage),
            )?
        };

        if let Some(old) = &previous.wrapping {
            let (sealed, _) = self.count_material()?;
            match self.active.wrapping_key()? {
                Some(new) => {
                    let count = self.store.reseal_all(old, &new)?;
                    info!(count, "stored material re-sealed under new KEK");
                }
                None if sealed > 0 => {
                    return Err(KekError::StillWrapping {
                        kcv: previous.pointer.clone().unwrap_or_default(),
                        sealed,
                    });
                }
                None => {}
            }
        }
        Ok(record)
    }

    fn rollback(&self, kcv: &str, had_record: bool, previous: &Previous) -> KekResult<()> {
        match &previous.pointer {
            Some(old) => self
                .element
                .store(names::ACTIVE_KEK, &SecretString::from(old.clone()))?,
            None => self.element.delete(names::ACTIVE_KEK)?,
        }
        if previous.pointer.as_deref() != Some(kcv) {
            self.element.delete(&names::kek(kcv))?;
        }

        match &previous.record {
            Some(old) if old.kcv != kcv => self.store.set_as_kek(&old.kcv)?,
            Some(_) => {}
            None => {
                if self.store.exists_with_kcv(kcv)? {
                    self.store.remove_kek_flag(kcv)?;
                }
            }
        }
        if !had_record && self.store.exists_with_kcv(kcv)? {
            self.store.delete(kcv)?;
        }
        Ok(())
    }
}

/// 16 → 2-key 3DES, 24 → 3-key 3DES, 32 → AES-256.
pub fn algorithm_for_length(length: usize) -> KekResult<KeyAlgorithm> {
    match length {
        16 => Ok(KeyAlgorithm::Tdes2Key),
        24 => Ok(KeyAlgorithm::Tdes3Key),
        32 => Ok(KeyAlgorithm::Aes256),
        other => Err(KekError::InvalidLength(other)),
    }
}
