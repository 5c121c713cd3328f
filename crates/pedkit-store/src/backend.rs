//! Persistence backends for the key store.
//!
//! Two backends are available:
//!   - **JSON** (default): loads entirely into memory, flushed atomically via temp+rename.
//!   - **Memory**: nothing touches disk; used by tests and dry runs.
//!
//! Both implement `KeyStoreBackend`. Records are keyed by their normalized
//! KCV; profiles map a profile name to the set of KCVs it references.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::record::KeyRecord;

pub type Profiles = BTreeMap<String, BTreeSet<String>>;

/// Trait for key store backends (JSON file and memory).
pub trait KeyStoreBackend: Send {
    /// Look up a record by normalized KCV.
    fn get(&self, kcv: &str) -> Option<&KeyRecord>;
    /// Insert or replace the record stored under its KCV.
    fn set(&mut self, record: KeyRecord);
    /// Remove a record.
    fn remove(&mut self, kcv: &str) -> Option<KeyRecord>;
    /// All records, ordered by KCV.
    fn all_entries(&self) -> Vec<&KeyRecord>;
    fn profiles(&self) -> &Profiles;
    /// Replace the KCV set of a profile; an empty set removes it.
    fn set_profile(&mut self, name: &str, kcvs: BTreeSet<String>);
    /// Flush pending changes to durable storage.
    fn flush(&mut self) -> Result<()>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// On-disk layout of the JSON backend
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    records: BTreeMap<String, KeyRecord>,
    #[serde(default)]
    profiles: Profiles,
}

// ── Memory backend ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: StoreFile,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStoreBackend for MemoryBackend {
    fn get(&self, kcv: &str) -> Option<&KeyRecord> {
        self.data.records.get(kcv)
    }

    fn set(&mut self, record: KeyRecord) {
        self.data.records.insert(record.kcv.clone(), record);
    }

    fn remove(&mut self, kcv: &str) -> Option<KeyRecord> {
        self.data.records.remove(kcv)
    }

    fn all_entries(&self) -> Vec<&KeyRecord> {
        self.data.records.values().collect()
    }

    fn profiles(&self) -> &Profiles {
        &self.data.profiles
    }

    fn set_profile(&mut self, name: &str, kcvs: BTreeSet<String>) {
        if kcvs.is_empty() {
            self.data.profiles.remove(name);
        } else {
            self.data.profiles.insert(name.to_string(), kcvs);
        }
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> usize {
        self.data.records.len()
    }
}

// ── JSON file backend ────────────────────────────────────────────────────────

/// In-memory key store persisted to a JSON file
pub struct JsonFileBackend {
    path: PathBuf,
    mem: MemoryBackend,
    dirty: bool,
}

impl JsonFileBackend {
    /// Load or create a store at the given path.
    /// If the file doesn't exist, starts empty.
    pub fn open(path: &Path) -> Result<Self> {
        let data = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading key store: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing key store: {}", path.display()))?
        } else {
            StoreFile::default()
        };

        Ok(JsonFileBackend {
            path: path.to_path_buf(),
            mem: MemoryBackend { data },
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyStoreBackend for JsonFileBackend {
    fn get(&self, kcv: &str) -> Option<&KeyRecord> {
        self.mem.get(kcv)
    }

    fn set(&mut self, record: KeyRecord) {
        self.mem.set(record);
        self.dirty = true;
    }

    fn remove(&mut self, kcv: &str) -> Option<KeyRecord> {
        let removed = self.mem.remove(kcv);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    fn all_entries(&self) -> Vec<&KeyRecord> {
        self.mem.all_entries()
    }

    fn profiles(&self) -> &Profiles {
        self.mem.profiles()
    }

    fn set_profile(&mut self, name: &str, kcvs: BTreeSet<String>) {
        self.mem.set_profile(name, kcvs);
        self.dirty = true;
    }

    /// Flush dirty changes to disk using an atomic write (write then rename).
    fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating key store dir: {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(&self.mem.data).context("serializing key store")?;

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &json)
            .with_context(|| format!("writing key store temp: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming key store: {}", self.path.display()))?;

        self.dirty = false;
        Ok(())
    }

    fn len(&self) -> usize {
        self.mem.len()
    }
}

impl Drop for JsonFileBackend {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(e) = self.flush() {
                tracing::warn!("failed to flush key store on drop: {e}");
            }
        }
    }
}
