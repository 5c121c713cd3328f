//! Store and KEK manager wiring shared by every command.

use anyhow::{Context, Result};
use pedkit_core::config::{expand_home, PedkitConfig};
use pedkit_secrets::{ActiveKek, KekManager, KeychainElement, SecurityElement};
use pedkit_store::{KeyStore, StoreError};
use std::sync::Arc;
use tracing::{info, warn};

pub struct Services {
    pub store: Arc<KeyStore>,
    pub kek: Arc<KekManager>,
}

/// Open the JSON key store with material sealed under the keychain KEK.
pub fn open(config: &PedkitConfig) -> Result<Services> {
    let element: Arc<dyn SecurityElement> =
        Arc::new(KeychainElement::new(config.kek.service_name.clone()));
    if !element.is_available() {
        warn!(
            service = %config.kek.service_name,
            "platform keychain unavailable: key material will not be sealed"
        );
    }

    let path = expand_home(&config.store.path);
    let store = KeyStore::open(&path)
        .with_context(|| format!("opening key store: {}", path.display()))?
        .with_encrypt_at_rest(config.store.encrypt_at_rest)
        .with_wrapping_source(Arc::new(ActiveKek::new(element.clone())));
    let store = Arc::new(store);
    info!(path = %path.display(), encrypt_at_rest = config.store.encrypt_at_rest, "key store open");

    let kek = Arc::new(KekManager::new(element, store.clone()));
    Ok(Services { store, kek })
}

/// Seal legacy plaintext material. Without an active KEK there is nothing to do.
pub fn migrate(store: &KeyStore) -> Result<()> {
    match store.migrate_legacy_to_sealed() {
        Ok(summary) => {
            info!(
                migrated = summary.migrated,
                skipped = summary.skipped,
                failed = summary.failed,
                "legacy key material migration done"
            );
            if summary.failed > 0 {
                warn!(failed = summary.failed, "some records could not be sealed");
            }
            Ok(())
        }
        Err(StoreError::NoWrappingKey) => {
            info!("no active AES-256 KEK, legacy migration skipped");
            Ok(())
        }
        Err(e) => Err(e).context("legacy key material migration"),
    }
}
