//! Software PED with in-memory key slots.
//!
//! Runs real DES/3DES/AES and ANSI X9.24 TDES DUKPT, so the end-to-end path
//! (inject, unwrap under a transport key, PIN block) behaves like hardware.
//! PIN entry is fed through a [`PinPad`] handle shared with the test or
//! operator driving the simulation. SM4, AES DUKPT, CMAC and UnionPay MACs
//! are not available in software and fail like an unsupported device would.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use pedkit_core::{Kcv, KeyAlgorithm, KeyType};
use pedkit_crypto::dukpt::{self, KeyVariant, IPEK_LEN, KSN_LEN};
use pedkit_crypto::pinblock::{self, PIN_BLOCK_LEN};
use pedkit_crypto::{compute_kcv, matches_checksum, BlockCipher};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::{KeyError, PedError, PedResult, SOFTWARE_FAILURE};
use crate::keysystem::{KeyFamily, KeySystem};
use crate::request::{
    CipherRequest, CipherResult, DeviceInfo, DukptInfo, DukptUse, EncryptedKey, KeyInfo,
    MacRequest, MacResult, PedStatus, PinLength, PinRequest, PinResult,
};
use crate::Ped;

// ── PIN pad ──────────────────────────────────────────────────────────────────

/// One action on the simulated keypad
#[derive(Clone, PartialEq, Eq)]
pub enum PinEntry {
    Digits(String),
    /// Enter pressed with no digits
    Bypass,
    /// Cancel key
    Cancel,
}

impl std::fmt::Debug for PinEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PinEntry::Digits(d) => write!(f, "Digits(<{} digits>)", d.len()),
            PinEntry::Bypass => f.write_str("Bypass"),
            PinEntry::Cancel => f.write_str("Cancel"),
        }
    }
}

#[derive(Default)]
struct PadInner {
    queue: Mutex<VecDeque<PinEntry>>,
    notify: Notify,
}

/// Handle for feeding keypad input to a [`SimulatedPed`]. Cheap to clone.
#[derive(Clone, Default)]
pub struct PinPad {
    inner: Arc<PadInner>,
}

impl PinPad {
    pub fn press(&self, entry: PinEntry) {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(entry);
        self.inner.notify.notify_one();
    }

    /// Queue a complete PIN followed by Enter.
    pub fn enter(&self, pin: &str) {
        self.press(PinEntry::Digits(pin.to_string()));
    }

    pub fn pending(&self) -> usize {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn clear(&self) {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn pop(&self) -> Option<PinEntry> {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Wait for an entry the request accepts. Entries of the wrong length are
    /// rejected by the pad and entry continues.
    async fn next_entry(&self, length: &PinLength, allow_bypass: bool) -> PinEntry {
        loop {
            while let Some(entry) = self.pop() {
                match &entry {
                    PinEntry::Digits(d) if !length.allows(d.len()) => {
                        debug!(digits = d.len(), "PIN length rejected by pad");
                    }
                    PinEntry::Bypass if !allow_bypass => {
                        debug!("bypass not allowed for this request");
                    }
                    _ => return entry,
                }
            }
            self.inner.notify.notified().await;
        }
    }
}

// ── Key slots ────────────────────────────────────────────────────────────────

struct SimKey {
    algorithm: KeyAlgorithm,
    material: Zeroizing<Vec<u8>>,
    kcv: Kcv,
}

struct DukptGroup {
    ipek: Zeroizing<[u8; IPEK_LEN]>,
    ksn: [u8; KSN_LEN],
    kcv: Kcv,
}

impl DukptGroup {
    fn info(&self) -> DukptInfo {
        DukptInfo {
            ksn: self.ksn.to_vec(),
            counter: dukpt::counter(&self.ksn).ok(),
        }
    }
}

async fn hang_if(stalled: bool) {
    if stalled {
        std::future::pending::<()>().await;
    }
}

/// In-memory PED.
pub struct SimulatedPed {
    keys: HashMap<(u32, KeyType), SimKey>,
    dukpt: HashMap<u32, DukptGroup>,
    info: DeviceInfo,
    pad: PinPad,
    max_slot: u32,
    tampered: bool,
    allow_overwrite: bool,
    ignore_pin_timeout: bool,
    stall_crypto: bool,
    aborted_entries: u64,
    aborted_operations: u64,
}

impl Default for SimulatedPed {
    fn default() -> Self {
        Self::new(DeviceInfo {
            serial: Some("SIM0000000000001".into()),
            firmware: Some(env!("CARGO_PKG_VERSION").into()),
            hardware: Some("software".into()),
            model: Some("pedkit-sim".into()),
        })
    }
}

impl SimulatedPed {
    pub fn new(info: DeviceInfo) -> Self {
        Self {
            keys: HashMap::new(),
            dukpt: HashMap::new(),
            info,
            pad: PinPad::default(),
            max_slot: 99,
            tampered: false,
            allow_overwrite: true,
            ignore_pin_timeout: false,
            stall_crypto: false,
            aborted_entries: 0,
            aborted_operations: 0,
        }
    }

    pub fn with_max_slot(mut self, max_slot: u32) -> Self {
        self.max_slot = max_slot;
        self
    }

    /// Handle for typing PINs into this device.
    pub fn pin_pad(&self) -> PinPad {
        self.pad.clone()
    }

    pub fn set_tampered(&mut self, tampered: bool) {
        self.tampered = tampered;
    }

    /// Refuse loads into occupied slots instead of replacing the key.
    pub fn set_allow_overwrite(&mut self, allow: bool) {
        self.allow_overwrite = allow;
    }

    /// Emulate firmware that never times out PIN entry on its own.
    pub fn set_ignore_pin_timeout(&mut self, ignore: bool) {
        self.ignore_pin_timeout = ignore;
    }

    /// Number of PIN entries the host told the device to abandon.
    pub fn aborted_entries(&self) -> u64 {
        self.aborted_entries
    }

    /// Make cipher and MAC calls hang until aborted, like a wedged secure processor.
    pub fn set_stall_crypto(&mut self, stall: bool) {
        self.stall_crypto = stall;
    }

    pub fn aborted_operations(&self) -> u64 {
        self.aborted_operations
    }

    pub fn key_count(&self) -> usize {
        self.keys.len() + self.dukpt.len()
    }

    fn check_slot(&self, slot: u32) -> Result<(), KeyError> {
        if slot > self.max_slot {
            return Err(KeyError::SlotOutOfRange {
                slot,
                max: self.max_slot,
            });
        }
        Ok(())
    }

    fn check_vacant(&self, slot: u32, key_type: KeyType) -> Result<(), KeyError> {
        let occupied = if key_type == KeyType::DukptInitial {
            self.dukpt.contains_key(&slot)
        } else {
            self.keys.contains_key(&(slot, key_type))
        };
        if occupied && !self.allow_overwrite {
            return Err(KeyError::DuplicateSlot { slot, key_type });
        }
        Ok(())
    }

    fn put(
        &mut self,
        slot: u32,
        key_type: KeyType,
        algorithm: KeyAlgorithm,
        material: Zeroizing<Vec<u8>>,
        expected_kcv: Option<&str>,
    ) -> Result<Kcv, KeyError> {
        self.check_slot(slot)?;
        self.check_vacant(slot, key_type)?;
        let kcv = verify_kcv(&material, algorithm, expected_kcv)?;
        self.keys.insert(
            (slot, key_type),
            SimKey {
                algorithm,
                material,
                kcv,
            },
        );
        info!(slot, key_type = %key_type, algorithm = %algorithm, kcv = %kcv, "key loaded");
        Ok(kcv)
    }

    fn put_dukpt(
        &mut self,
        group: u32,
        algorithm: KeyAlgorithm,
        ipek: &[u8],
        ksn: &[u8],
        expected_kcv: Option<&str>,
    ) -> Result<(), KeyError> {
        if algorithm != KeyAlgorithm::Tdes2Key {
            return Err(KeyError::UnsupportedAlgorithm(algorithm));
        }
        self.check_slot(group)?;
        self.check_vacant(group, KeyType::DukptInitial)?;
        let kcv = verify_kcv(ipek, algorithm, expected_kcv)?;
        let ipek: [u8; IPEK_LEN] = ipek.try_into().map_err(|_| KeyError::InvalidLength {
            algorithm,
            len: ipek.len(),
        })?;
        let ksn: [u8; KSN_LEN] = ksn.try_into().map_err(|_| KeyError::InvalidLength {
            algorithm,
            len: ksn.len(),
        })?;
        self.dukpt.insert(
            group,
            DukptGroup {
                ipek: Zeroizing::new(ipek),
                ksn,
                kcv,
            },
        );
        info!(group, kcv = %kcv, ksn = %hex::encode_upper(ksn), "DUKPT initial key loaded");
        Ok(())
    }

    /// Decrypt `ciphertext` under the resident key at `(slot, key_type)`.
    fn unwrap_under(
        &self,
        slot: u32,
        key_type: KeyType,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KeyError> {
        let transport = self
            .keys
            .get(&(slot, key_type))
            .ok_or(KeyError::MissingTransportKey { slot, key_type })?;
        let system = KeySystem::for_transport(key_type, transport.algorithm)?;
        debug!(slot, ?system, "unwrapping under transport key");
        match system.family() {
            KeyFamily::Des | KeyFamily::Aes => {
                let cipher = BlockCipher::new(transport.algorithm, &transport.material)?;
                Ok(Zeroizing::new(cipher.decrypt_ecb(ciphertext)?))
            }
            KeyFamily::Sm4 => Err(KeyError::UnsupportedAlgorithm(transport.algorithm)),
        }
    }

    fn fixed_key(&self, slot: u32, key_type: KeyType) -> PedResult<&SimKey> {
        self.keys
            .get(&(slot, key_type))
            .ok_or(PedError::KeyNotFound { slot, key_type })
    }

    fn dukpt_group(&mut self, group: u32) -> PedResult<&mut DukptGroup> {
        self.dukpt.get_mut(&group).ok_or(PedError::KeyNotFound {
            slot: group,
            key_type: KeyType::DukptInitial,
        })
    }

    /// Current DUKPT working key, advancing the counter first when asked.
    fn dukpt_key(
        &mut self,
        dukpt_use: DukptUse,
    ) -> PedResult<(Zeroizing<[u8; IPEK_LEN]>, DukptInfo)> {
        let group = self.dukpt_group(dukpt_use.group)?;
        if dukpt_use.increment_ksn {
            group.ksn = dukpt::next_ksn(&group.ksn)?;
        }
        let key = dukpt::working_key(group.ipek.as_slice(), &group.ksn, dukpt_use.variant)?;
        Ok((key, group.info()))
    }

    /// Resolve the cipher a request runs under.
    fn request_cipher(
        &mut self,
        slot: u32,
        key_type: KeyType,
        dukpt_use: Option<DukptUse>,
    ) -> PedResult<(BlockCipher, Option<DukptInfo>)> {
        match dukpt_use {
            Some(d) => {
                let (key, info) = self.dukpt_key(d)?;
                let cipher = BlockCipher::new(KeyAlgorithm::Tdes2Key, key.as_slice())?;
                Ok((cipher, Some(info)))
            }
            None => {
                let key = self.fixed_key(slot, key_type)?;
                Ok((BlockCipher::new(key.algorithm, &key.material)?, None))
            }
        }
    }

    fn run_cipher(&mut self, request: &CipherRequest, encrypt: bool) -> PedResult<CipherResult> {
        let (cipher, dukpt) = self.request_cipher(request.slot, request.key_type, request.dukpt)?;
        if dukpt.is_none() && cipher.algorithm() != request.algorithm {
            warn!(
                slot = request.slot,
                requested = %request.algorithm,
                resident = %cipher.algorithm(),
                "request algorithm differs from resident key, using resident"
            );
        }
        let iv = request.iv.as_deref();
        let data = if encrypt {
            cipher.encrypt(request.mode, iv, &request.data)?
        } else {
            cipher.decrypt(request.mode, iv, &request.data)?
        };
        Ok(CipherResult { data, dukpt })
    }

    fn encrypt_pin_block(
        &mut self,
        request: &PinRequest,
        pin: &str,
    ) -> PedResult<([u8; PIN_BLOCK_LEN], Option<DukptInfo>)> {
        let clear = Zeroizing::new(pinblock::build(request.format, pin, request.pan.as_deref())?);
        let (cipher, dukpt) = self.request_cipher(request.slot, request.key_type, request.dukpt)?;
        if !cipher.algorithm().is_des_family() {
            return Err(PedError::CryptoFailure {
                code: SOFTWARE_FAILURE,
                reason: format!("{} keys need ISO format 4 PIN blocks", cipher.algorithm()),
            });
        }
        let encrypted = cipher.encrypt_ecb(clear.as_slice())?;
        let block: [u8; PIN_BLOCK_LEN] =
            encrypted
                .as_slice()
                .try_into()
                .map_err(|_| PedError::CryptoFailure {
                    code: SOFTWARE_FAILURE,
                    reason: "PIN block is not 8 bytes".into(),
                })?;
        Ok((block, dukpt))
    }
}

fn verify_kcv(key: &[u8], algorithm: KeyAlgorithm, expected: Option<&str>) -> Result<Kcv, KeyError> {
    let kcv = compute_kcv(key, Some(algorithm))?;
    if let Some(expected) = expected {
        if !matches_checksum(&kcv, expected) {
            return Err(KeyError::KcvMismatch {
                expected: expected.to_string(),
                actual: kcv.to_hex(),
            });
        }
    }
    Ok(kcv)
}

// ── Capability interface ─────────────────────────────────────────────────────

impl Ped for SimulatedPed {
    async fn status(&mut self) -> PedResult<PedStatus> {
        Ok(PedStatus {
            tampered: self.tampered,
            battery_percent: None,
            error_message: self.tampered.then(|| "tamper flag set".to_string()),
        })
    }

    async fn config(&mut self) -> PedResult<DeviceInfo> {
        Ok(self.info.clone())
    }

    async fn write_key(
        &mut self,
        slot: u32,
        key_type: KeyType,
        algorithm: KeyAlgorithm,
        key: &EncryptedKey,
        transport_slot: u32,
        transport_type: KeyType,
    ) -> Result<(), KeyError> {
        if key_type.is_dukpt() {
            return Err(KeyError::UnsupportedKeyType(format!(
                "{key_type} is loaded through the DUKPT calls"
            )));
        }
        let clear = self.unwrap_under(transport_slot, transport_type, &key.ciphertext)?;
        self.put(slot, key_type, algorithm, clear, key.kcv.as_deref())?;
        Ok(())
    }

    async fn write_key_plain(
        &mut self,
        slot: u32,
        key_type: KeyType,
        algorithm: KeyAlgorithm,
        key: &[u8],
        kcv: Option<&str>,
    ) -> Result<(), KeyError> {
        if !matches!(
            key_type,
            KeyType::Master | KeyType::Transport | KeyType::Kek | KeyType::Ktk
        ) {
            return Err(KeyError::UnsupportedKeyType(format!(
                "{key_type} cannot be loaded in the clear"
            )));
        }
        self.put(slot, key_type, algorithm, Zeroizing::new(key.to_vec()), kcv)?;
        Ok(())
    }

    async fn delete_key(&mut self, slot: u32, key_type: KeyType) -> Result<(), KeyError> {
        self.check_slot(slot)?;
        let removed = if key_type == KeyType::DukptInitial {
            self.dukpt.remove(&slot).is_some()
        } else {
            self.keys.remove(&(slot, key_type)).is_some()
        };
        debug!(slot, key_type = %key_type, removed, "delete key");
        Ok(())
    }

    async fn delete_all_keys(&mut self) -> Result<(), KeyError> {
        info!(count = self.key_count(), "erasing all keys");
        self.keys.clear();
        self.dukpt.clear();
        Ok(())
    }

    async fn is_key_present(&mut self, slot: u32, key_type: KeyType) -> bool {
        if key_type == KeyType::DukptInitial {
            self.dukpt.contains_key(&slot)
        } else {
            self.keys.contains_key(&(slot, key_type))
        }
    }

    async fn key_info(&mut self, slot: u32, key_type: KeyType) -> PedResult<Option<KeyInfo>> {
        if key_type == KeyType::DukptInitial {
            return Ok(self.dukpt.get(&slot).map(|g| KeyInfo {
                slot,
                key_type,
                algorithm: KeyAlgorithm::Tdes2Key,
                kcv: Some(g.kcv),
            }));
        }
        Ok(self.keys.get(&(slot, key_type)).map(|k| KeyInfo {
            slot,
            key_type,
            algorithm: k.algorithm,
            kcv: Some(k.kcv),
        }))
    }

    async fn write_dukpt_initial_key(
        &mut self,
        group: u32,
        algorithm: KeyAlgorithm,
        ipek: &[u8],
        initial_ksn: &[u8],
        kcv: Option<&str>,
    ) -> Result<(), KeyError> {
        self.put_dukpt(group, algorithm, ipek, initial_ksn, kcv)
    }

    async fn write_dukpt_initial_key_encrypted(
        &mut self,
        group: u32,
        algorithm: KeyAlgorithm,
        encrypted_ipek: &[u8],
        initial_ksn: &[u8],
        transport_slot: u32,
        kcv: Option<&str>,
    ) -> Result<(), KeyError> {
        let transport_type = [KeyType::Transport, KeyType::Master]
            .into_iter()
            .find(|t| self.keys.contains_key(&(transport_slot, *t)))
            .ok_or(KeyError::MissingTransportKey {
                slot: transport_slot,
                key_type: KeyType::Transport,
            })?;
        let ipek = self.unwrap_under(transport_slot, transport_type, encrypted_ipek)?;
        self.put_dukpt(group, algorithm, &ipek, initial_ksn, kcv)
    }

    async fn dukpt_info(&mut self, group: u32) -> PedResult<Option<DukptInfo>> {
        Ok(self.dukpt.get(&group).map(DukptGroup::info))
    }

    async fn increment_dukpt_ksn(&mut self, group: u32) -> PedResult<()> {
        let group = self.dukpt_group(group)?;
        group.ksn = dukpt::next_ksn(&group.ksn)?;
        Ok(())
    }

    async fn encrypt(&mut self, request: &CipherRequest) -> PedResult<CipherResult> {
        hang_if(self.stall_crypto).await;
        self.run_cipher(request, true)
    }

    async fn decrypt(&mut self, request: &CipherRequest) -> PedResult<CipherResult> {
        hang_if(self.stall_crypto).await;
        self.run_cipher(request, false)
    }

    async fn calculate_mac(&mut self, request: &MacRequest) -> PedResult<MacResult> {
        hang_if(self.stall_crypto).await;
        let (key, algorithm, dukpt) = match request.dukpt {
            Some(d) => {
                let d = DukptUse {
                    variant: KeyVariant::Mac,
                    ..d
                };
                let (key, info) = self.dukpt_key(d)?;
                (
                    Zeroizing::new(key.to_vec()),
                    KeyAlgorithm::Tdes2Key,
                    Some(info),
                )
            }
            None => {
                let key = self.fixed_key(request.slot, request.key_type)?;
                (key.material.clone(), key.algorithm, None)
            }
        };
        let mac = pedkit_crypto::mac::calculate(request.algorithm, algorithm, &key, &request.data)?;
        Ok(MacResult { mac, dukpt })
    }

    async fn random_bytes(&mut self, len: usize) -> PedResult<Vec<u8>> {
        Ok(pedkit_crypto::random_bytes(len))
    }

    async fn get_pin_block(&mut self, request: &PinRequest) -> PedResult<PinResult> {
        // fail fast when the key is missing, before anyone types
        match request.dukpt {
            Some(d) => {
                self.dukpt_group(d.group)?;
            }
            None => {
                self.fixed_key(request.slot, request.key_type)?;
            }
        }

        let pad = self.pad.clone();
        let wait = pad.next_entry(&request.length, request.allow_bypass);
        let entry = if self.ignore_pin_timeout {
            wait.await
        } else {
            tokio::time::timeout(Duration::from_secs(request.timeout_secs), wait)
                .await
                .map_err(|_| PedError::Timeout)?
        };

        match entry {
            PinEntry::Cancel => Err(PedError::Cancelled),
            PinEntry::Bypass => Ok(PinResult {
                pin_block: [0u8; PIN_BLOCK_LEN],
                bypassed: true,
                dukpt: None,
            }),
            PinEntry::Digits(digits) => {
                let digits = Zeroizing::new(digits);
                let (pin_block, dukpt) = self.encrypt_pin_block(request, &digits)?;
                Ok(PinResult {
                    pin_block,
                    bypassed: false,
                    dukpt,
                })
            }
        }
    }

    async fn cancel_pin_entry(&mut self) {
        self.aborted_entries += 1;
        self.pad.clear();
        debug!(aborted = self.aborted_entries, "PIN entry aborted");
    }

    async fn abort_operation(&mut self) {
        self.aborted_operations += 1;
        debug!(aborted = self.aborted_operations, "crypto operation aborted");
    }
}
