//! Security element: where root key material lives.
//!
//! The platform implementation uses the `keyring` crate:
//! - macOS: Keychain Services
//! - Linux: GNOME Keyring / Secret Service (D-Bus)
//! - Windows: Credential Manager (DPAPI)
//!
//! Raw key bytes are stored base64-encoded. `MemoryElement` keeps everything
//! in process and is what tests and dry runs use.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use zeroize::{Zeroize, Zeroizing};

/// Well-known entry names
pub mod names {
    /// Holds the KCV of the KEK currently wrapping stored material
    pub const ACTIVE_KEK: &str = "active-kek";

    /// Entry holding the raw bytes of the KEK with this KCV.
    pub fn kek(kcv: &str) -> String {
        format!("kek-{kcv}")
    }
}

pub trait SecurityElement: Send + Sync {
    fn store(&self, name: &str, secret: &SecretString) -> Result<()>;
    fn load(&self, name: &str) -> Result<Option<SecretString>>;
    /// Deleting a missing entry is not an error.
    fn delete(&self, name: &str) -> Result<()>;
    fn is_available(&self) -> bool;
}

/// Store raw bytes under `name`.
pub fn store_bytes(element: &dyn SecurityElement, name: &str, bytes: &[u8]) -> Result<()> {
    let encoded = SecretString::from(STANDARD.encode(bytes));
    element.store(name, &encoded)
}

/// Load raw bytes stored with [`store_bytes`].
pub fn load_bytes(element: &dyn SecurityElement, name: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
    match element.load(name)? {
        Some(secret) => {
            let bytes = STANDARD
                .decode(secret.expose_secret())
                .map_err(|e| anyhow!("security element entry '{name}' is not base64: {e}"))?;
            Ok(Some(Zeroizing::new(bytes)))
        }
        None => Ok(None),
    }
}

// ── Platform keychain ────────────────────────────────────────────────────────

pub struct KeychainElement {
    service: String,
}

impl KeychainElement {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, name: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, name).map_err(|e| anyhow!("keychain entry creation: {e}"))
    }
}

impl SecurityElement for KeychainElement {
    fn store(&self, name: &str, secret: &SecretString) -> Result<()> {
        self.entry(name)?
            .set_password(secret.expose_secret())
            .map_err(|e| anyhow!("keychain store for '{name}': {e}"))?;
        tracing::debug!(entry = name, "stored secret in platform keychain");
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Option<SecretString>> {
        match self.entry(name)?.get_password() {
            Ok(mut password) => {
                let secret = SecretString::from(password.clone());
                password.zeroize();
                Ok(Some(secret))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(anyhow!("keychain get for '{name}': {e}")),
        }
    }

    fn delete(&self, name: &str) -> Result<()> {
        match self.entry(name)?.delete_credential() {
            Ok(()) => {
                tracing::debug!(entry = name, "deleted secret from platform keychain");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(anyhow!("keychain delete for '{name}': {e}")),
        }
    }

    fn is_available(&self) -> bool {
        keyring::Entry::new(&self.service, "__pedkit_probe__").is_ok()
    }
}

// ── In-memory ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryElement {
    entries: Mutex<HashMap<String, Zeroizing<String>>>,
    /// Fail every `store` after this many successes
    fail_after: Mutex<Option<usize>>,
}

impl MemoryElement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the element refuse writes once `n` more have succeeded.
    pub fn fail_stores_after(&self, n: usize) {
        if let Ok(mut limit) = self.fail_after.lock() {
            *limit = Some(n);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .lock()
            .map(|e| e.contains_key(name))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SecurityElement for MemoryElement {
    fn store(&self, name: &str, secret: &SecretString) -> Result<()> {
        let mut limit = self
            .fail_after
            .lock()
            .map_err(|_| anyhow!("memory element lock poisoned"))?;
        match limit.as_mut() {
            Some(0) => return Err(anyhow!("memory element refused write of '{name}'")),
            Some(n) => *n -= 1,
            None => {}
        }
        self.entries
            .lock()
            .map_err(|_| anyhow!("memory element lock poisoned"))?
            .insert(name.to_string(), Zeroizing::new(secret.expose_secret().to_string()));
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Option<SecretString>> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| anyhow!("memory element lock poisoned"))?
            .get(name)
            .map(|v| SecretString::from(v.to_string())))
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("memory element lock poisoned"))?
            .remove(name);
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }
}
