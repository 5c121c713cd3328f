//! The Key Lifecycle Store.
//!
//! Every operation runs inside one critical section over the backend, so the
//! clear-then-set sequence of the KEK/KTK flags is atomic to readers. Each
//! mutation is flushed before the lock is released.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use pedkit_core::{now_epoch, KeyStatus, KeyType};
use pedkit_crypto::{open, seal, WrappingKey};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::backend::{JsonFileBackend, KeyStoreBackend, MemoryBackend};
use crate::deletion::{self, DeletionCheck, DeletionReport};
use crate::error::{StoreError, StoreResult};
use crate::record::{normalize_kcv, KekRole, KeyMaterial, KeyRecord, NewKey};

/// Supplies the wrapping key that seals stored material.
///
/// The store asks for the key each time it seals or opens and drops it
/// straight after; it never keeps a copy.
pub trait WrappingKeySource: Send + Sync {
    fn wrapping_key(&self) -> anyhow::Result<Option<WrappingKey>>;
}

pub struct KeyStore {
    backend: Mutex<Box<dyn KeyStoreBackend>>,
    wrapping: Option<Arc<dyn WrappingKeySource>>,
    encrypt_at_rest: bool,
}

impl KeyStore {
    pub fn new(backend: impl KeyStoreBackend + 'static) -> Self {
        Self {
            backend: Mutex::new(Box::new(backend)),
            wrapping: None,
            encrypt_at_rest: true,
        }
    }

    /// Open the JSON store at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let backend = JsonFileBackend::open(path)?;
        info!(path = %path.display(), records = backend.len(), "key store opened");
        Ok(Self::new(backend))
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    pub fn with_wrapping_source(mut self, source: Arc<dyn WrappingKeySource>) -> Self {
        self.wrapping = Some(source);
        self
    }

    pub fn with_encrypt_at_rest(mut self, enabled: bool) -> Self {
        self.encrypt_at_rest = enabled;
        self
    }

    pub(crate) fn lock(&self) -> StoreResult<MutexGuard<'_, Box<dyn KeyStoreBackend>>> {
        self.backend.lock().map_err(|_| StoreError::LockPoisoned)
    }

    pub(crate) fn wrapping_key(&self) -> StoreResult<Option<WrappingKey>> {
        match &self.wrapping {
            Some(source) => Ok(source.wrapping_key()?),
            None => Ok(None),
        }
    }

    // ── Maybe-encrypt gate ───────────────────────────────────────────────────

    /// Seal `bytes` when a wrapping key is available. KEK storage material is
    /// never sealed under itself.
    fn protect(&self, role: KekRole, kcv: &str, bytes: &[u8]) -> StoreResult<KeyMaterial> {
        if role == KekRole::Storage || !self.encrypt_at_rest {
            return Ok(KeyMaterial::plain(bytes));
        }
        match self.wrapping_key()? {
            Some(key) => Ok(KeyMaterial::Sealed(seal(&key, bytes)?)),
            None => {
                warn!(kcv, "no wrapping key active, storing key material unsealed");
                Ok(KeyMaterial::plain(bytes))
            }
        }
    }

    pub(crate) fn reveal(&self, material: &KeyMaterial) -> StoreResult<Zeroizing<Vec<u8>>> {
        match material {
            KeyMaterial::Plain { hex } => hex::decode(hex)
                .map(Zeroizing::new)
                .map_err(|e| StoreError::InvalidMaterial(e.to_string())),
            KeyMaterial::Sealed(sealed) => {
                let key = self.wrapping_key()?.ok_or(StoreError::NoWrappingKey)?;
                Ok(open(&key, sealed)?)
            }
        }
    }

    // ── Records ──────────────────────────────────────────────────────────────

    /// Insert a record, or update the record with the same KCV.
    ///
    /// Ceremony keys are only ever inserted: an existing record with the same
    /// KCV is returned untouched.
    pub fn record_injection(&self, new: NewKey) -> StoreResult<KeyRecord> {
        let kcv = normalize_kcv(&new.kcv);
        let material = match &new.material {
            Some(bytes) => Some(self.protect(new.kek_role, &kcv, bytes)?),
            None => None,
        };

        let mut backend = self.lock()?;
        let existing = backend.get(&kcv).cloned();
        if let (Some(existing), KeyType::CeremonyKey) = (&existing, new.key_type) {
            info!(kcv = %kcv, "ceremony key already recorded");
            return Ok(existing.clone());
        }

        let record = match existing {
            Some(mut rec) => {
                rec.slot = new.slot;
                rec.key_type = new.key_type;
                rec.algorithm = new.algorithm;
                if material.is_some() {
                    rec.material = material;
                }
                rec.status = new.status;
                if new.label.is_some() {
                    rec.label = new.label;
                }
                rec
            }
            None => KeyRecord {
                id: Uuid::new_v4(),
                slot: new.slot,
                key_type: new.key_type,
                algorithm: new.algorithm,
                kcv: kcv.clone(),
                material,
                status: new.status,
                kek_role: KekRole::None,
                label: new.label,
                created_at: now_epoch(),
            },
        };
        backend.set(record);
        if new.kek_role != KekRole::None {
            assign_role(&mut **backend, &kcv, new.kek_role);
        }
        backend.flush()?;

        let stored = backend
            .get(&kcv)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(kcv.clone()))?;
        debug!(
            kcv = %kcv,
            slot = ?stored.slot,
            key_type = %stored.key_type,
            status = %stored.status,
            "key recorded"
        );
        Ok(stored)
    }

    /// Most recent record at a PED slot.
    pub fn get_by_slot_and_type(
        &self,
        slot: u32,
        key_type: KeyType,
    ) -> StoreResult<Option<KeyRecord>> {
        let backend = self.lock()?;
        Ok(backend
            .all_entries()
            .into_iter()
            .filter(|r| r.slot == Some(slot) && r.key_type == key_type)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    /// Most recent record at a PED slot whose load did not fail.
    pub fn get_resident(&self, slot: u32, key_type: KeyType) -> StoreResult<Option<KeyRecord>> {
        let backend = self.lock()?;
        Ok(backend
            .all_entries()
            .into_iter()
            .filter(|r| {
                r.slot == Some(slot) && r.key_type == key_type && r.status != KeyStatus::Failed
            })
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    pub fn get_by_kcv(&self, kcv: &str) -> StoreResult<Option<KeyRecord>> {
        Ok(self.lock()?.get(&normalize_kcv(kcv)).cloned())
    }

    pub fn exists_with_kcv(&self, kcv: &str) -> StoreResult<bool> {
        Ok(self.lock()?.get(&normalize_kcv(kcv)).is_some())
    }

    /// All records, oldest first.
    pub fn list_all(&self) -> StoreResult<Vec<KeyRecord>> {
        let backend = self.lock()?;
        let mut records: Vec<KeyRecord> = backend.all_entries().into_iter().cloned().collect();
        records.sort_by_key(|r| (r.created_at, r.slot));
        Ok(records)
    }

    /// Clear key bytes of a record, opened if sealed.
    pub fn key_material(&self, kcv: &str) -> StoreResult<Option<Zeroizing<Vec<u8>>>> {
        let material = {
            let backend = self.lock()?;
            let record = backend
                .get(&normalize_kcv(kcv))
                .ok_or_else(|| StoreError::NotFound(kcv.to_string()))?;
            record.material.clone()
        };
        material.map(|m| self.reveal(&m)).transpose()
    }

    pub fn update_status(&self, kcv: &str, status: KeyStatus) -> StoreResult<()> {
        let kcv = normalize_kcv(kcv);
        let mut backend = self.lock()?;
        let mut record = backend
            .get(&kcv)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(kcv.clone()))?;
        record.status = status;
        backend.set(record);
        backend.flush()?;
        Ok(())
    }

    pub fn update_status_for_all(&self, status: KeyStatus) -> StoreResult<usize> {
        let mut backend = self.lock()?;
        let updated: Vec<KeyRecord> = backend
            .all_entries()
            .into_iter()
            .filter(|r| r.status != status)
            .cloned()
            .collect();
        let count = updated.len();
        for mut record in updated {
            record.status = status;
            backend.set(record);
        }
        backend.flush()?;
        Ok(count)
    }

    // ── Deletion ─────────────────────────────────────────────────────────────

    pub fn validate_deletion(&self, kcv: &str) -> StoreResult<DeletionCheck> {
        let kcv = normalize_kcv(kcv);
        let backend = self.lock()?;
        let record = backend
            .get(&kcv)
            .ok_or_else(|| StoreError::NotFound(kcv.clone()))?;
        Ok(deletion::check(record, backend.profiles()))
    }

    pub fn validate_all_deletions(&self) -> StoreResult<DeletionReport> {
        let backend = self.lock()?;
        Ok(deletion::report(backend.all_entries(), backend.profiles()))
    }

    /// Delete one record after the safety check.
    pub fn delete(&self, kcv: &str) -> StoreResult<KeyRecord> {
        let kcv = normalize_kcv(kcv);
        let mut backend = self.lock()?;
        let record = backend
            .get(&kcv)
            .ok_or_else(|| StoreError::NotFound(kcv.clone()))?;
        let check = deletion::check(record, backend.profiles());
        if let Some(reason) = check.reason {
            warn!(kcv = %kcv, %reason, "deletion blocked");
            return Err(StoreError::DeletionBlocked { kcv, reason });
        }
        let removed = backend
            .remove(&kcv)
            .ok_or_else(|| StoreError::NotFound(kcv.clone()))?;
        backend.flush()?;
        info!(kcv = %kcv, key_type = %removed.key_type, "key record deleted");
        Ok(removed)
    }

    /// Delete every slotted record that passes the safety check. Slot-less
    /// records (KEK storage, ceremony keys) are left alone.
    pub fn delete_all(&self) -> StoreResult<DeletionReport> {
        let mut backend = self.lock()?;
        let slotted: Vec<KeyRecord> = backend
            .all_entries()
            .into_iter()
            .filter(|r| r.slot.is_some())
            .cloned()
            .collect();
        let report = deletion::report(&slotted, backend.profiles());
        let blocked: BTreeSet<&str> = report.blocked.iter().map(|b| b.kcv.as_str()).collect();
        for record in &slotted {
            if !blocked.contains(record.kcv.as_str()) {
                backend.remove(&record.kcv);
            }
        }
        backend.flush()?;
        info!(
            deleted = report.deletable,
            blocked = report.blocked.len(),
            "bulk key deletion"
        );
        Ok(report)
    }

    // ── KEK / KTK flags ──────────────────────────────────────────────────────

    /// Make `kcv` the only active KEK. The previous holder loses the flag and
    /// becomes INACTIVE; it is not deleted.
    pub fn set_as_kek(&self, kcv: &str) -> StoreResult<()> {
        self.set_role(kcv, KekRole::Storage)
    }

    /// Make `kcv` the only KTK.
    pub fn set_as_ktk(&self, kcv: &str) -> StoreResult<()> {
        self.set_role(kcv, KekRole::Transport)
    }

    pub fn remove_kek_flag(&self, kcv: &str) -> StoreResult<()> {
        self.clear_role(kcv, KekRole::Storage)
    }

    pub fn remove_ktk_flag(&self, kcv: &str) -> StoreResult<()> {
        self.clear_role(kcv, KekRole::Transport)
    }

    pub fn current_kek(&self) -> StoreResult<Option<KeyRecord>> {
        let backend = self.lock()?;
        Ok(backend
            .all_entries()
            .into_iter()
            .find(|r| r.is_active_kek())
            .cloned())
    }

    pub fn current_ktk(&self) -> StoreResult<Option<KeyRecord>> {
        let backend = self.lock()?;
        Ok(backend
            .all_entries()
            .into_iter()
            .find(|r| r.is_active_ktk())
            .cloned())
    }

    fn set_role(&self, kcv: &str, role: KekRole) -> StoreResult<()> {
        let kcv = normalize_kcv(kcv);
        let mut backend = self.lock()?;
        if backend.get(&kcv).is_none() {
            return Err(StoreError::NotFound(kcv));
        }
        assign_role(&mut **backend, &kcv, role);
        backend.flush()?;
        Ok(())
    }

    fn clear_role(&self, kcv: &str, role: KekRole) -> StoreResult<()> {
        let kcv = normalize_kcv(kcv);
        let mut backend = self.lock()?;
        let mut record = backend
            .get(&kcv)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(kcv.clone()))?;
        if record.kek_role == role {
            record.kek_role = KekRole::None;
            backend.set(record);
            backend.flush()?;
        }
        Ok(())
    }

    // ── Profiles ─────────────────────────────────────────────────────────────

    pub fn assign_profile(&self, name: &str, kcv: &str) -> StoreResult<()> {
        let kcv = normalize_kcv(kcv);
        let mut backend = self.lock()?;
        if backend.get(&kcv).is_none() {
            return Err(StoreError::NotFound(kcv));
        }
        let mut kcvs = backend.profiles().get(name).cloned().unwrap_or_default();
        kcvs.insert(kcv);
        backend.set_profile(name, kcvs);
        backend.flush()?;
        Ok(())
    }

    pub fn remove_profile(&self, name: &str) -> StoreResult<()> {
        let mut backend = self.lock()?;
        backend.set_profile(name, BTreeSet::new());
        backend.flush()?;
        Ok(())
    }

    pub fn profiles_using(&self, kcv: &str) -> StoreResult<Vec<String>> {
        let backend = self.lock()?;
        Ok(deletion::profiles_using(
            backend.profiles(),
            &normalize_kcv(kcv),
        ))
    }

    pub fn flush(&self) -> StoreResult<()> {
        Ok(self.lock()?.flush()?)
    }
}

/// Give `kcv` the role, clearing it from every other holder first.
fn assign_role(backend: &mut dyn KeyStoreBackend, kcv: &str, role: KekRole) {
    let holders: Vec<KeyRecord> = backend
        .all_entries()
        .into_iter()
        .filter(|r| r.kek_role == role && r.kcv != kcv)
        .cloned()
        .collect();
    for mut prior in holders {
        prior.kek_role = KekRole::None;
        if role == KekRole::Storage {
            prior.status = KeyStatus::Inactive;
        }
        info!(kcv = %prior.kcv, ?role, "role cleared from previous holder");
        backend.set(prior);
    }
    if let Some(mut record) = backend.get(kcv).cloned() {
        record.kek_role = role;
        if role == KekRole::Storage {
            record.status = KeyStatus::Active;
        }
        backend.set(record);
    }
}
