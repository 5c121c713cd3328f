//! KEK manager against a real key store.
//!
//! Invariants tested:
//!   1. Generating a KEK demotes the previous one to INACTIVE and keeps its record
//!   2. Stored material is sealed under the active KEK and survives rotation
//!   3. A rotation that cannot complete restores the previous KEK untouched
//!   4. The raw KEK never appears in the key store file

use std::sync::Arc;

use pedkit_core::{KeyAlgorithm, KeyStatus, KeyType};
use pedkit_secrets::element::names;
use pedkit_secrets::{ActiveKek, KekError, KekManager, MemoryElement, SecurityElement};
use pedkit_store::{KeyStore, NewKey};

const WORKING: [u8; 16] = [0x5A; 16];

fn setup(store: KeyStore) -> (Arc<MemoryElement>, Arc<KeyStore>, KekManager) {
    let element = Arc::new(MemoryElement::new());
    let shared: Arc<dyn SecurityElement> = element.clone();
    let store = Arc::new(store.with_wrapping_source(Arc::new(ActiveKek::new(shared.clone()))));
    let manager = KekManager::new(shared, store.clone());
    (element, store, manager)
}

fn working_key(store: &KeyStore, kcv: &str, slot: u32) {
    store
        .record_injection(
            NewKey::new(KeyType::WorkingPin, KeyAlgorithm::Tdes2Key, kcv)
                .slot(slot)
                .material(&WORKING)
                .status(KeyStatus::Successful),
        )
        .unwrap();
}

#[test]
fn new_kek_demotes_previous() {
    let (_, store, manager) = setup(KeyStore::in_memory());
    let first = manager.generate(32).unwrap();
    let second = manager.generate(24).unwrap();

    let old = store.get_by_kcv(&first.kcv).unwrap().unwrap();
    assert_eq!(old.status, KeyStatus::Inactive);
    assert!(!old.is_kek_storage());

    let current = store.current_kek().unwrap().unwrap();
    assert_eq!(current.kcv, second.kcv);
    assert_eq!(current.algorithm, KeyAlgorithm::Tdes3Key);
}

#[test]
fn material_survives_rotation() {
    let (element, store, manager) = setup(KeyStore::in_memory());
    let first = manager.generate(32).unwrap();
    working_key(&store, "111111", 1);
    working_key(&store, "222222", 2);
    assert!(store
        .get_by_kcv("111111")
        .unwrap()
        .unwrap()
        .material
        .unwrap()
        .is_sealed());

    let second = manager.rotate(32).unwrap();
    assert_ne!(first.kcv, second.kcv);
    assert!(!element.contains(&names::kek(&first.kcv)));

    for kcv in ["111111", "222222"] {
        let clear = store.key_material(kcv).unwrap().unwrap();
        assert_eq!(clear.as_slice(), &WORKING);
    }
    let status = manager.status().unwrap();
    assert_eq!(status.sealed_records, 2);
    assert_eq!(status.pointer.as_deref(), Some(second.kcv.as_str()));
}

#[test]
fn failed_rotation_restores_previous_kek() {
    let (element, store, manager) = setup(KeyStore::in_memory());
    let first = manager.generate(32).unwrap();
    working_key(&store, "111111", 1);
    let before = store.list_all().unwrap();
    let entries = element.len();

    // a 3DES KEK cannot take over sealed material
    let err = manager.rotate(16).unwrap_err();
    assert!(matches!(err, KekError::Rotation { restored: true, .. }));

    assert_eq!(store.list_all().unwrap(), before);
    assert_eq!(element.len(), entries);
    let current = store.current_kek().unwrap().unwrap();
    assert_eq!(current.kcv, first.kcv);
    assert_eq!(
        store.key_material("111111").unwrap().unwrap().as_slice(),
        &WORKING
    );
}

#[test]
fn kek_bytes_stay_out_of_the_store_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys.json");
    let (element, store, manager) = setup(KeyStore::open(&path).unwrap());
    let kek = manager.generate(32).unwrap();
    store.flush().unwrap();

    let raw = pedkit_secrets::element::load_bytes(element.as_ref(), &names::kek(&kek.kcv))
        .unwrap()
        .unwrap();
    let on_disk = std::fs::read_to_string(&path).unwrap();
    assert!(on_disk.contains(&kek.kcv));
    assert!(!on_disk.contains(&hex_upper(&raw)));
}

fn hex_upper(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}
