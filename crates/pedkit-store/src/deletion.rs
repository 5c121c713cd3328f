//! Deletion safety.
//!
//! A key must not be deleted while a profile references it, while it is the
//! active KEK, or while it is the active KTK. Every refusal names its reason.

use pedkit_core::KeyType;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::backend::Profiles;
use crate::record::KeyRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeletionReason {
    InUseByProfiles,
    IsActiveKek,
    IsActiveKtk,
    /// Referenced by profiles and also the active KEK or KTK
    Multiple,
}

impl fmt::Display for DeletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeletionReason::InUseByProfiles => "IN_USE_BY_PROFILES",
            DeletionReason::IsActiveKek => "IS_ACTIVE_KEK",
            DeletionReason::IsActiveKtk => "IS_ACTIVE_KTK",
            DeletionReason::Multiple => "MULTIPLE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionCheck {
    pub can_delete: bool,
    pub reason: Option<DeletionReason>,
    pub profiles: Vec<String>,
    pub is_active_kek: bool,
    pub is_active_ktk: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedKey {
    pub kcv: String,
    pub slot: Option<u32>,
    pub key_type: KeyType,
    pub reason: DeletionReason,
    pub profiles: Vec<String>,
    pub is_active_kek: bool,
    pub is_active_ktk: bool,
}

/// Outcome of checking (or performing) a bulk deletion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub total: usize,
    pub deletable: usize,
    pub blocked: Vec<BlockedKey>,
}

impl DeletionReport {
    pub fn is_clear(&self) -> bool {
        self.blocked.is_empty()
    }
}

/// Names of the profiles referencing `kcv`.
pub(crate) fn profiles_using(profiles: &Profiles, kcv: &str) -> Vec<String> {
    profiles
        .iter()
        .filter(|(_, kcvs)| kcvs.contains(kcv))
        .map(|(name, _)| name.clone())
        .collect()
}

pub(crate) fn check(record: &KeyRecord, profiles: &Profiles) -> DeletionCheck {
    let using = profiles_using(profiles, &record.kcv);
    let is_active_kek = record.is_active_kek();
    let is_active_ktk = record.is_active_ktk();

    let reason = match (!using.is_empty(), is_active_kek, is_active_ktk) {
        (true, true, _) | (true, _, true) => Some(DeletionReason::Multiple),
        (true, false, false) => Some(DeletionReason::InUseByProfiles),
        (false, true, _) => Some(DeletionReason::IsActiveKek),
        (false, false, true) => Some(DeletionReason::IsActiveKtk),
        (false, false, false) => None,
    };

    DeletionCheck {
        can_delete: reason.is_none(),
        reason,
        profiles: using,
        is_active_kek,
        is_active_ktk,
    }
}

pub(crate) fn report<'a>(
    records: impl IntoIterator<Item = &'a KeyRecord>,
    profiles: &Profiles,
) -> DeletionReport {
    let mut report = DeletionReport::default();
    for record in records {
        report.total += 1;
        let check = check(record, profiles);
        match check.reason {
            None => report.deletable += 1,
            Some(reason) => report.blocked.push(BlockedKey {
                kcv: record.kcv.clone(),
                slot: record.slot,
                key_type: record.key_type,
                reason,
                profiles: check.profiles,
                is_active_kek: check.is_active_kek,
                is_active_ktk: check.is_active_ktk,
            }),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::KekRole;
    use pedkit_core::{KeyAlgorithm, KeyStatus};
    use std::collections::BTreeSet;

    fn record(kcv: &str, role: KekRole, status: KeyStatus) -> KeyRecord {
        KeyRecord {
            id: uuid::Uuid::new_v4(),
            slot: None,
            key_type: KeyType::Kek,
            algorithm: KeyAlgorithm::Aes256,
            kcv: kcv.into(),
            material: None,
            status,
            kek_role: role,
            label: None,
            created_at: 0,
        }
    }

    fn profiles(kcv: &str) -> Profiles {
        Profiles::from([("visa".to_string(), BTreeSet::from([kcv.to_string()]))])
    }

    #[test]
    fn test_reason_precedence() {
        let kek = record("AAAAAA", KekRole::Storage, KeyStatus::Active);
        assert_eq!(
            check(&kek, &profiles("AAAAAA")).reason,
            Some(DeletionReason::Multiple)
        );
        assert_eq!(
            check(&kek, &Profiles::new()).reason,
            Some(DeletionReason::IsActiveKek)
        );

        let ktk = record("BBBBBB", KekRole::Transport, KeyStatus::Successful);
        assert_eq!(
            check(&ktk, &profiles("BBBBBB")).reason,
            Some(DeletionReason::Multiple)
        );
        assert_eq!(
            check(&ktk, &Profiles::new()).reason,
            Some(DeletionReason::IsActiveKtk)
        );

        let plain = record("CCCCCC", KekRole::None, KeyStatus::Successful);
        let c = check(&plain, &profiles("CCCCCC"));
        assert_eq!(c.reason, Some(DeletionReason::InUseByProfiles));
        assert_eq!(c.profiles, vec!["visa".to_string()]);
        assert!(check(&plain, &Profiles::new()).can_delete);
    }

    #[test]
    fn test_inactive_kek_is_deletable() {
        let old = record("DDDDDD", KekRole::Storage, KeyStatus::Inactive);
        assert!(check(&old, &Profiles::new()).can_delete);
    }

    #[test]
    fn test_report_counts() {
        let a = record("AAAAAA", KekRole::Storage, KeyStatus::Active);
        let b = record("BBBBBB", KekRole::None, KeyStatus::Active);
        let r = report([&a, &b], &Profiles::new());
        assert_eq!(r.total, 2);
        assert_eq!(r.deletable, 1);
        assert_eq!(r.blocked.len(), 1);
        assert_eq!(r.blocked[0].reason, DeletionReason::IsActiveKek);
    }
}
