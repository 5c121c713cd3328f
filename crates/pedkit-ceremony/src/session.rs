use std::sync::Arc;
use std::time::Duration;

use pedkit_core::{KeyAlgorithm, KeyStatus, KeyType};
use pedkit_crypto::{compute_kcv, xor_into, CryptoError};
use pedkit_secrets::KekManager;
use pedkit_store::{KekRole, KeyStore, NewKey};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::{CeremonyError, CeremonyResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CeremonyState {
    NotStarted,
    InProgress,
    Completed,
}

/// Returned to the custodian after each component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentReceipt {
    /// 1-based custodian number
    pub custodian: u8,
    /// KCV of this component alone
    pub kcv: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CeremonyOutcome {
    pub kcv: String,
    pub record_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct CeremonyStatus {
    pub state: CeremonyState,
    pub custodians: u8,
    pub received: u8,
    pub algorithm: Option<KeyAlgorithm>,
    pub kek_role: KekRole,
    pub last_component_kcv: Option<String>,
}

/// Parameters fixed at `start`.
struct Plan {
    custodians: u8,
    algorithm: KeyAlgorithm,
    kek_role: KekRole,
}

pub struct CeremonySession {
    store: Arc<KeyStore>,
    kek: Arc<KekManager>,
    /// Per-custodian limit; the clock restarts after every component
    component_timeout: Option<Duration>,
    state: CeremonyState,
    plan: Option<Plan>,
    accumulator: Zeroizing<Vec<u8>>,
    received: u8,
    last_kcv: Option<String>,
    deadline: Option<Instant>,
}

impl CeremonySession {
    pub fn new(store: Arc<KeyStore>, kek: Arc<KekManager>) -> Self {
        Self {
            store,
            kek,
            component_timeout: None,
            state: CeremonyState::NotStarted,
            plan: None,
            accumulator: Zeroizing::new(Vec::new()),
            received: 0,
            last_kcv: None,
            deadline: None,
        }
    }

    pub fn with_component_timeout(mut self, timeout: Duration) -> Self {
        self.component_timeout = Some(timeout);
        self
    }

    pub fn state(&self) -> CeremonyState {
        self.state
    }

    /// Begin a ceremony for `custodians` components.
    ///
    /// A storage-KEK ceremony always assembles an AES-256 key. Any other
    /// ceremony needs a storage KEK to already be active.
    pub fn start(
        &mut self,
        custodians: u8,
        algorithm: KeyAlgorithm,
        kek_role: KekRole,
    ) -> CeremonyResult<()> {
        if self.state == CeremonyState::InProgress {
            return Err(CeremonyError::InvalidState {
                expected: CeremonyState::NotStarted,
                actual: self.state,
            });
        }
        if !(2..=3).contains(&custodians) {
            return Err(CeremonyError::InvalidCustodians(custodians));
        }
        let algorithm = match kek_role {
            KekRole::Storage => KeyAlgorithm::Aes256,
            _ => algorithm,
        };
        if algorithm == KeyAlgorithm::Sm4 {
            return Err(CryptoError::UnsupportedAlgorithm(algorithm).into());
        }
        if kek_role == KekRole::None && !self.kek.has_active_kek()? {
            return Err(CeremonyError::NoStorageKek);
        }

        self.reset();
        self.accumulator = Zeroizing::new(vec![0u8; algorithm.key_len()]);
        self.plan = Some(Plan {
            custodians,
            algorithm,
            kek_role,
        });
        self.state = CeremonyState::InProgress;
        self.restart_clock();
        info!(custodians, %algorithm, ?kek_role, "key ceremony started");
        Ok(())
    }

    /// XOR one custodian's component into the key and return its KCV.
    pub fn add_component(&mut self, component_hex: &str) -> CeremonyResult<ComponentReceipt> {
        let (custodians, algorithm) = match (&self.plan, self.state) {
            (Some(plan), CeremonyState::InProgress) => (plan.custodians, plan.algorithm),
            _ => {
                return Err(CeremonyError::InvalidState {
                    expected: CeremonyState::InProgress,
                    actual: self.state,
                })
            }
        };
        if self.is_expired() {
            warn!(received = self.received, "custodian timeout, cancelling ceremony");
            self.cancel();
            return Err(CeremonyError::Expired);
        }
        if self.received >= custodians {
            return Err(CeremonyError::InvalidState {
                expected: CeremonyState::Completed,
                actual: self.state,
            });
        }

        let clean = component_hex.trim();
        let expected = algorithm.key_len() * 2;
        if clean.len() != expected {
            return Err(CeremonyError::WrongLength {
                expected,
                actual: clean.len(),
            });
        }
        let component = Zeroizing::new(
            hex::decode(clean).map_err(|e| CeremonyError::InvalidHex(e.to_string()))?,
        );

        let kcv = compute_kcv(&component, Some(algorithm))?.to_hex();
        xor_into(&mut self.accumulator, &component)?;
        self.received += 1;
        self.last_kcv = Some(kcv.clone());
        self.restart_clock();
        info!(custodian = self.received, kcv = %kcv, "component received");

        Ok(ComponentReceipt {
            custodian: self.received,
            kcv,
        })
    }

    /// Persist the assembled key once every component is in.
    pub fn finalize(&mut self, label: Option<&str>) -> CeremonyResult<CeremonyOutcome> {
        let (custodians, algorithm, kek_role) = match (&self.plan, self.state) {
            (Some(plan), CeremonyState::InProgress) => {
                (plan.custodians, plan.algorithm, plan.kek_role)
            }
            _ => {
                return Err(CeremonyError::InvalidState {
                    expected: CeremonyState::InProgress,
                    actual: self.state,
                })
            }
        };
        if self.received != custodians {
            return Err(CeremonyError::Incomplete {
                received: self.received,
                needed: custodians,
            });
        }

        let kcv = compute_kcv(&self.accumulator, Some(algorithm))?.to_hex();
        let existed = self.store.exists_with_kcv(&kcv)?;

        let mut new = NewKey::new(KeyType::CeremonyKey, algorithm, kcv.as_str())
            .status(KeyStatus::Active);
        if let Some(label) = label {
            new = new.label(label);
        }
        match kek_role {
            // the storage KEK lives in the security element only
            KekRole::Storage => {}
            KekRole::Transport => new = new.material(&self.accumulator).role(KekRole::Transport),
            KekRole::None => new = new.material(&self.accumulator),
        }
        let record = self.store.record_injection(new)?;

        if kek_role == KekRole::Storage {
            if let Err(e) = self.kek.install_ceremony_kek(&self.accumulator, &kcv) {
                if !existed {
                    if let Err(cleanup) = self.store.delete(&kcv) {
                        warn!(kcv = %kcv, "could not remove ceremony record: {cleanup}");
                    }
                }
                return Err(e.into());
            }
        }

        self.accumulator = Zeroizing::new(Vec::new());
        self.deadline = None;
        self.state = CeremonyState::Completed;
        info!(kcv = %kcv, %algorithm, ?kek_role, "key ceremony completed");
        Ok(CeremonyOutcome {
            kcv,
            record_id: record.id,
        })
    }

    /// Abandon the ceremony. Nothing is persisted.
    pub fn cancel(&mut self) {
        if self.state == CeremonyState::InProgress {
            info!(received = self.received, "key ceremony cancelled");
        }
        self.reset();
        self.state = CeremonyState::NotStarted;
    }

    pub fn status(&self) -> CeremonyStatus {
        CeremonyStatus {
            state: self.state,
            custodians: self.plan.as_ref().map_or(0, |p| p.custodians),
            received: self.received,
            algorithm: self.plan.as_ref().map(|p| p.algorithm),
            kek_role: self.plan.as_ref().map_or(KekRole::None, |p| p.kek_role),
            last_component_kcv: self.last_kcv.clone(),
        }
    }

    /// Whether the current custodian has run out of time.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn restart_clock(&mut self) {
        self.deadline = self.component_timeout.map(|t| Instant::now() + t);
    }

    fn reset(&mut self) {
        // dropping the old buffer zeroizes it
        self.accumulator = Zeroizing::new(Vec::new());
        self.plan = None;
        self.received = 0;
        self.last_kcv = None;
        self.deadline = None;
    }
}
