//! Key store lifecycle through the public API.
//!
//! Invariants tested:
//!   1. At most one record is the active KEK; promoting another demotes the
//!      previous holder to INACTIVE without deleting it
//!   2. A key referenced by a profile, or holding the active KEK/KTK role,
//!      cannot be deleted and the refusal names the reason
//!   3. Sealing is transparent: material reads back identical whether sealed
//!      or plain, and the file on disk never holds clear bytes once sealed
//!   4. Legacy plain material migrates to sealed; re-sealing is all-or-nothing
//!   5. Bulk deletion only touches slotted records

use std::sync::{Arc, Mutex};

use pedkit_core::{KeyAlgorithm, KeyStatus, KeyType};
use pedkit_crypto::WrappingKey;
use pedkit_store::{
    DeletionReason, KekRole, KeyStore, NewKey, StoreError, WrappingKeySource,
};
use proptest::prelude::*;

const MATERIAL: [u8; 16] = [
    0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF, 0xFE, 0xDC, 0xBA, 0x98, 0x76, 0x54, 0x32, 0x10,
];

/// Wrapping key that tests can swap at runtime.
#[derive(Default)]
struct SwitchableKey(Mutex<Option<[u8; 32]>>);

impl SwitchableKey {
    fn set(&self, key: Option<[u8; 32]>) {
        *self.0.lock().unwrap() = key;
    }
}

impl WrappingKeySource for SwitchableKey {
    fn wrapping_key(&self) -> anyhow::Result<Option<WrappingKey>> {
        Ok(self.0.lock().unwrap().map(WrappingKey::from_bytes))
    }
}

fn kek(kcv: &str) -> NewKey {
    NewKey::new(KeyType::Kek, KeyAlgorithm::Aes256, kcv)
        .material(&[0x42; 32])
        .role(KekRole::Storage)
}

fn working(kcv: &str, slot: u32) -> NewKey {
    NewKey::new(KeyType::WorkingPin, KeyAlgorithm::Tdes2Key, kcv)
        .slot(slot)
        .material(&MATERIAL)
        .status(KeyStatus::Successful)
}

// ── KEK uniqueness ───────────────────────────────────────────────────────────

#[test]
fn promoting_a_kek_demotes_the_previous_one() {
    let store = KeyStore::in_memory();
    store.record_injection(kek("AAAAAA")).unwrap();
    store
        .record_injection(NewKey::new(KeyType::Kek, KeyAlgorithm::Aes256, "BBBBBB"))
        .unwrap();

    store.set_as_kek("BBBBBB").unwrap();

    let records = store.list_all().unwrap();
    let active: Vec<_> = records.iter().filter(|r| r.is_active_kek()).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].kcv, "BBBBBB");

    let old = store.get_by_kcv("AAAAAA").unwrap().unwrap();
    assert_eq!(old.status, KeyStatus::Inactive);
    assert!(!old.is_kek_storage());
}

proptest! {
    #[test]
    fn kek_promotions_leave_one_holder(order in proptest::collection::vec(0usize..4, 1..12)) {
        let store = KeyStore::in_memory();
        let kcvs = ["A00001", "A00002", "A00003", "A00004"];
        for kcv in kcvs {
            store
                .record_injection(NewKey::new(KeyType::Kek, KeyAlgorithm::Aes256, kcv))
                .unwrap();
        }
        for i in &order {
            store.set_as_kek(kcvs[*i]).unwrap();
        }
        let holders: Vec<_> = store
            .list_all()
            .unwrap()
            .into_iter()
            .filter(|r| r.is_kek_storage())
            .collect();
        prop_assert_eq!(holders.len(), 1);
        prop_assert_eq!(&holders[0].kcv, kcvs[*order.last().unwrap()]);
        prop_assert_eq!(store.list_all().unwrap().len(), 4);
    }
}

// ── Deletion safety ──────────────────────────────────────────────────────────

#[test]
fn profile_reference_blocks_deletion() {
    let store = KeyStore::in_memory();
    store.record_injection(working("08D7B4", 13)).unwrap();
    store.assign_profile("acquirer-a", "08d7b4").unwrap();

    let check = store.validate_deletion("08D7B4").unwrap();
    assert!(!check.can_delete);
    assert_eq!(check.reason, Some(DeletionReason::InUseByProfiles));
    assert_eq!(check.profiles, vec!["acquirer-a".to_string()]);

    let err = store.delete("08D7B4").unwrap_err();
    assert!(matches!(
        err,
        StoreError::DeletionBlocked {
            reason: DeletionReason::InUseByProfiles,
            ..
        }
    ));
    assert!(store.exists_with_kcv("08D7B4").unwrap());

    store.remove_profile("acquirer-a").unwrap();
    store.delete("08D7B4").unwrap();
    assert!(!store.exists_with_kcv("08D7B4").unwrap());
}

#[test]
fn unreferenced_key_deletes() {
    let store = KeyStore::in_memory();
    store.record_injection(working("C6A13B", 2)).unwrap();
    assert!(store.validate_deletion("C6A13B").unwrap().can_delete);
    let removed = store.delete("C6A13B").unwrap();
    assert_eq!(removed.slot, Some(2));
    assert!(store.list_all().unwrap().is_empty());
}

#[test]
fn active_roles_block_deletion() {
    let store = KeyStore::in_memory();
    store.record_injection(kek("AAAAAA")).unwrap();
    store
        .record_injection(working("BBBBBB", 1).role(KekRole::Transport))
        .unwrap();

    assert!(matches!(
        store.delete("AAAAAA"),
        Err(StoreError::DeletionBlocked {
            reason: DeletionReason::IsActiveKek,
            ..
        })
    ));
    assert!(matches!(
        store.delete("BBBBBB"),
        Err(StoreError::DeletionBlocked {
            reason: DeletionReason::IsActiveKtk,
            ..
        })
    ));

    store.remove_ktk_flag("BBBBBB").unwrap();
    store.delete("BBBBBB").unwrap();
}

#[test]
fn delete_all_skips_slotless_and_blocked_records() {
    let store = KeyStore::in_memory();
    store.record_injection(kek("AAAAAA")).unwrap();
    store
        .record_injection(NewKey::new(
            KeyType::CeremonyKey,
            KeyAlgorithm::Tdes2Key,
            "CCCCCC",
        ))
        .unwrap();
    store.record_injection(working("111111", 1)).unwrap();
    store.record_injection(working("222222", 2)).unwrap();
    store.assign_profile("p", "222222").unwrap();

    let report = store.delete_all().unwrap();
    assert_eq!(report.total, 2);
    assert_eq!(report.deletable, 1);
    assert_eq!(report.blocked.len(), 1);
    assert_eq!(report.blocked[0].kcv, "222222");

    let left: Vec<String> = store
        .list_all()
        .unwrap()
        .into_iter()
        .map(|r| r.kcv)
        .collect();
    assert_eq!(left.len(), 3);
    assert!(!left.contains(&"111111".to_string()));
}

// ── Sealing ──────────────────────────────────────────────────────────────────

#[test]
fn sealing_is_transparent_and_hides_bytes_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys.json");
    let source = Arc::new(SwitchableKey::default());
    source.set(Some([7; 32]));

    {
        let store = KeyStore::open(&path)
            .unwrap()
            .with_wrapping_source(source.clone());
        let rec = store.record_injection(working("08D7B4", 13)).unwrap();
        assert!(rec.material.unwrap().is_sealed());
    }

    let on_disk = std::fs::read_to_string(&path).unwrap();
    assert!(!on_disk.contains(&hex::encode_upper(MATERIAL)));

    let store = KeyStore::open(&path).unwrap().with_wrapping_source(source);
    let clear = store.key_material("08D7B4").unwrap().unwrap();
    assert_eq!(clear.as_slice(), &MATERIAL);
}

#[test]
fn sealed_material_needs_a_wrapping_key() {
    let source = Arc::new(SwitchableKey::default());
    source.set(Some([7; 32]));
    let store = KeyStore::in_memory().with_wrapping_source(source.clone());
    store.record_injection(working("08D7B4", 13)).unwrap();

    source.set(None);
    assert!(matches!(
        store.key_material("08D7B4"),
        Err(StoreError::NoWrappingKey)
    ));
}

#[test]
fn legacy_material_migrates_to_sealed() {
    let source = Arc::new(SwitchableKey::default());
    let store = KeyStore::in_memory().with_wrapping_source(source.clone());
    store.record_injection(working("111111", 1)).unwrap();
    store.record_injection(working("222222", 2)).unwrap();
    store.record_injection(kek("AAAAAA")).unwrap();

    assert!(matches!(
        store.migrate_legacy_to_sealed(),
        Err(StoreError::NoWrappingKey)
    ));

    source.set(Some([9; 32]));
    let summary = store.migrate_legacy_to_sealed().unwrap();
    assert_eq!(summary.migrated, 2);
    assert_eq!(summary.skipped, 1);

    for rec in store.list_all().unwrap() {
        let sealed = rec.material.as_ref().unwrap().is_sealed();
        assert_eq!(sealed, !rec.is_kek_storage(), "{}", rec.kcv);
    }
    assert_eq!(
        store.key_material("111111").unwrap().unwrap().as_slice(),
        &MATERIAL
    );
}

#[test]
fn reseal_is_all_or_nothing() {
    let source = Arc::new(SwitchableKey::default());
    source.set(Some([1; 32]));
    let store = KeyStore::in_memory().with_wrapping_source(source.clone());
    store.record_injection(working("111111", 1)).unwrap();
    store.record_injection(working("222222", 2)).unwrap();
    let before = store.list_all().unwrap();

    let wrong = WrappingKey::from_bytes([5; 32]);
    let new = WrappingKey::from_bytes([2; 32]);
    assert!(store.reseal_all(&wrong, &new).is_err());
    assert_eq!(store.list_all().unwrap(), before);

    let old = WrappingKey::from_bytes([1; 32]);
    assert_eq!(store.reseal_all(&old, &new).unwrap(), 2);
    source.set(Some([2; 32]));
    assert_eq!(
        store.key_material("222222").unwrap().unwrap().as_slice(),
        &MATERIAL
    );
}
