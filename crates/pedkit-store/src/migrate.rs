//! Re-encryption of stored material.
//!
//! `migrate_legacy_to_sealed` seals every plain record under the current
//! wrapping key, skipping records whose material cannot be read. `reseal_all`
//! moves sealed material from an old wrapping key to a new one and either
//! rewrites every record or none.

use pedkit_crypto::seal::{reseal, seal};
use pedkit_crypto::WrappingKey;
use tracing::{info, warn};

use crate::error::{StoreError, StoreResult};
use crate::record::{KeyMaterial, KeyRecord};
use crate::store::KeyStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    pub migrated: usize,
    /// Already sealed, without material, or KEK storage records
    pub skipped: usize,
    pub failed: usize,
}

impl KeyStore {
    /// Seal every plain record that is not itself KEK storage.
    pub fn migrate_legacy_to_sealed(&self) -> StoreResult<MigrationSummary> {
        let key = self.wrapping_key()?.ok_or(StoreError::NoWrappingKey)?;
        let mut backend = self.lock()?;

        let mut summary = MigrationSummary::default();
        let mut sealed: Vec<KeyRecord> = Vec::new();
        for record in backend.all_entries() {
            match &record.material {
                Some(material @ KeyMaterial::Plain { .. }) if !record.is_kek_storage() => {
                    let result = self
                        .reveal(material)
                        .and_then(|clear| seal(&key, &clear).map_err(StoreError::from));
                    match result {
                        Ok(material) => {
                            let mut updated = record.clone();
                            updated.material = Some(KeyMaterial::Sealed(material));
                            sealed.push(updated);
                        }
                        Err(e) => {
                            warn!(kcv = %record.kcv, "skipping record in migration: {e}");
                            summary.failed += 1;
                        }
                    }
                }
                _ => summary.skipped += 1,
            }
        }

        summary.migrated = sealed.len();
        for record in sealed {
            backend.set(record);
        }
        backend.flush()?;
        info!(
            migrated = summary.migrated,
            skipped = summary.skipped,
            failed = summary.failed,
            "legacy key material sealed"
        );
        Ok(summary)
    }

    /// Re-seal all sealed material from `old` to `new`. Nothing is written
    /// unless every record opens under `old`.
    pub fn reseal_all(&self, old: &WrappingKey, new: &WrappingKey) -> StoreResult<usize> {
        let mut backend = self.lock()?;

        let mut updated = Vec::new();
        for record in backend.all_entries() {
            if let Some(KeyMaterial::Sealed(material)) = &record.material {
                let mut next = record.clone();
                next.material = Some(KeyMaterial::Sealed(reseal(old, new, material)?));
                updated.push(next);
            }
        }

        let count = updated.len();
        for record in updated {
            backend.set(record);
        }
        backend.flush()?;
        info!(count, "key material re-sealed under new wrapping key");
        Ok(count)
    }
}
