use std::sync::{Arc, PoisonError, RwLock};

use pedkit_core::config::{DeviceBrand, LinkConfig};
use pedkit_core::{kcv_prefix_matches, KeyAlgorithm, KeyStatus, KeyType};
use pedkit_ped::{EncryptedKey, KeyError, KeyInfo, Ped};
use pedkit_protocol::formatter::{
    brand_response, delete_all_response, delete_single_response, inject_key_response,
    read_serial_response, uninstall_response, write_serial_response,
};
use pedkit_protocol::message::{code, InjectKeyCommand, LEGACY_VERSION};
use pedkit_protocol::{ErrorCode, Message};
use pedkit_store::{BlockedKey, KekRole, KeyRecord, KeyStore, NewKey};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::InjectError;
use crate::keymap::{self, Encryption};

/// Serial numbers are exactly this many characters on the wire.
pub const SERIAL_LEN: usize = 16;

/// Checksum recorded for a failed load that arrived without one.
const NO_CHECKSUM: &str = "0000";

/// Result of a key load the PED accepted.
struct Loaded {
    kcv: String,
    /// Clear key kept for transport keys loaded in the clear
    material: Option<Zeroizing<Vec<u8>>>,
}

/// Maps parsed host commands onto one PED and the key store.
///
/// The PED sits behind an async mutex: every link served by this dispatcher
/// queues on it, so firmware never sees interleaved calls.
pub struct Dispatcher<P: Ped> {
    ped: Arc<Mutex<P>>,
    store: Arc<KeyStore>,
    link: LinkConfig,
    serial: RwLock<String>,
}

impl<P: Ped> Dispatcher<P> {
    pub fn new(ped: Arc<Mutex<P>>, store: Arc<KeyStore>, link: LinkConfig) -> Self {
        let serial = RwLock::new(link.device_serial.clone());
        Self {
            ped,
            store,
            link,
            serial,
        }
    }

    /// Take ownership of a PED that nothing else drives.
    pub fn with_ped(ped: P, store: Arc<KeyStore>, link: LinkConfig) -> Self {
        Self::new(Arc::new(Mutex::new(ped)), store, link)
    }

    pub fn ped(&self) -> &Arc<Mutex<P>> {
        &self.ped
    }

    pub fn store(&self) -> &Arc<KeyStore> {
        &self.store
    }

    pub fn link(&self) -> &LinkConfig {
        &self.link
    }

    /// Serial reported to the host; starts as `link.device_serial`.
    pub fn serial(&self) -> String {
        self.serial
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Answer one message. Returns the framed reply, or `None` when the
    /// message gets none (responses, unknown codes, unparseable payloads).
    pub async fn handle(&self, message: Message) -> Option<Vec<u8>> {
        match message {
            Message::InjectKey(cmd) => Some(self.inject(&cmd).await),
            Message::ReadSerial { .. } => {
                Some(read_serial_response(ErrorCode::Successful, &self.serial()))
            }
            Message::WriteSerial { serial, .. } => Some(self.write_serial(&serial)),
            Message::DeleteAllKeys { .. } => Some(self.delete_all().await),
            Message::DeleteSingleKey { slot, key_type, .. } => {
                Some(self.delete_single(slot, &key_type).await)
            }
            Message::UninstallApp { version, .. } => {
                warn!(version = %version, "uninstall requested, not supported here");
                Some(uninstall_response(ErrorCode::InvalidCommand))
            }
            Message::ValidateBrand {
                expected_device_type,
                ..
            } => Some(self.validate_brand(&expected_device_type)),
            Message::InjectKeyResponse(_)
            | Message::UninstallAppResponse { .. }
            | Message::ValidateBrandResponse { .. } => {
                debug!(code = ?message.command_code(), "ignoring response frame");
                None
            }
            Message::Unknown { code, payload } => {
                warn!(code = %code, len = payload.len(), "unknown command");
                None
            }
            Message::ParseError { raw, message } => {
                log_parse_error(&raw, &message);
                None
            }
        }
    }

    // ── Key injection ────────────────────────────────────────────────────────

    async fn inject(&self, cmd: &InjectKeyCommand) -> Vec<u8> {
        let key_type = match keymap::key_type(&cmd.key_type, &cmd.key_sub_type) {
            Ok(t) => t,
            Err(e) => {
                warn!(slot = cmd.key_slot, key_type = %cmd.key_type, "injection refused: {e}");
                let code = InjectError::from(e).response_code();
                return inject_key_response(code, &cmd.key_checksum);
            }
        };
        let algorithm = keymap::algorithm(&cmd.algorithm);
        info!(
            slot = cmd.key_slot,
            ktk_slot = cmd.ktk_slot,
            key_type = %key_type,
            algorithm = %algorithm,
            encryption = %cmd.encryption_type,
            batch = ?cmd.batch,
            "key injection"
        );

        let outcome = {
            let mut ped = self.ped.lock().await;
            self.load(&mut ped, cmd, key_type, algorithm).await
        };
        self.record(cmd, key_type, algorithm, &outcome);

        match outcome {
            Ok(loaded) => {
                info!(slot = cmd.key_slot, key_type = %key_type, kcv = %loaded.kcv, "key injected");
                inject_key_response(ErrorCode::Successful, &cmd.key_checksum)
            }
            Err(e) => {
                let code = e.response_code();
                warn!(
                    slot = cmd.key_slot,
                    key_type = %key_type,
                    response = %code,
                    "key injection failed: {e}"
                );
                inject_key_response(code, &cmd.key_checksum)
            }
        }
    }

    async fn load(
        &self,
        ped: &mut P,
        cmd: &InjectKeyCommand,
        key_type: KeyType,
        algorithm: KeyAlgorithm,
    ) -> Result<Loaded, InjectError> {
        let expected = expected_kcv(cmd);
        let mut material = None;

        match Encryption::from_code(&cmd.encryption_type) {
            Encryption::Clear => {
                let key = decode_key(&cmd.key_hex)?;
                match key_type {
                    KeyType::Master | KeyType::Transport => {
                        ped.write_key_plain(cmd.key_slot, key_type, algorithm, &key, expected)
                            .await?;
                        if key_type == KeyType::Transport {
                            material = Some(key);
                        }
                    }
                    KeyType::DukptInitial => {
                        let ksn = decode_ksn(&cmd.ksn)?;
                        ped.write_dukpt_initial_key(cmd.key_slot, algorithm, &key, &ksn, expected)
                            .await?;
                    }
                    other => {
                        return Err(KeyError::UnsupportedKeyType(format!(
                            "{other} cannot be loaded in the clear"
                        ))
                        .into())
                    }
                }
            }
            Encryption::UnderResidentKey => {
                let transport =
                    self.resident_transport(cmd, &[KeyType::Transport, KeyType::Master])?;
                let ciphertext = decode_key(&cmd.key_hex)?;
                match key_type {
                    KeyType::DukptInitial => {
                        let ksn = decode_ksn(&cmd.ksn)?;
                        ped.write_dukpt_initial_key_encrypted(
                            cmd.key_slot,
                            algorithm,
                            &ciphertext,
                            &ksn,
                            cmd.ktk_slot,
                            expected,
                        )
                        .await?;
                    }
                    KeyType::WorkingPin | KeyType::WorkingMac | KeyType::WorkingData => {
                        let key = EncryptedKey {
                            ciphertext: ciphertext.to_vec(),
                            kcv: expected.map(str::to_string),
                        };
                        ped.write_key(
                            cmd.key_slot,
                            key_type,
                            algorithm,
                            &key,
                            cmd.ktk_slot,
                            transport.key_type,
                        )
                        .await?;
                    }
                    other => {
                        return Err(KeyError::UnsupportedKeyType(format!(
                            "{other} cannot be loaded under a resident key"
                        ))
                        .into())
                    }
                }
            }
            Encryption::UnderTransportKey => {
                let transport = self.resident_transport(cmd, &[KeyType::Transport])?;
                if cmd.ktk_hex.is_some() {
                    debug!(ktk_slot = cmd.ktk_slot, "inline transport key ignored, using resident KTK");
                }
                let key = EncryptedKey {
                    ciphertext: decode_key(&cmd.key_hex)?.to_vec(),
                    kcv: expected.map(str::to_string),
                };
                ped.write_key(
                    cmd.key_slot,
                    key_type,
                    algorithm,
                    &key,
                    cmd.ktk_slot,
                    transport.key_type,
                )
                .await?;
            }
            Encryption::DukptIpekClear => {
                if key_type != KeyType::DukptInitial {
                    return Err(KeyError::UnsupportedKeyType(format!(
                        "{key_type} is not a DUKPT initial key"
                    ))
                    .into());
                }
                let ksn = cmd.ksn.trim();
                if ksn.is_empty() || ksn.chars().all(|c| c == '0') {
                    return Err(InjectError::rejected(
                        ErrorCode::InvalidKsn,
                        format!("KSN '{ksn}' is blank or all zeros"),
                    ));
                }
                let needed = keymap::ipek_len(algorithm)
                    .ok_or(KeyError::UnsupportedAlgorithm(algorithm))?;
                let ipek = decode_key(&cmd.key_hex)?;
                if ipek.len() != needed {
                    return Err(KeyError::InvalidLength {
                        algorithm,
                        len: ipek.len(),
                    }
                    .into());
                }
                let ksn = keymap::device_ksn(&decode_ksn(ksn)?, algorithm);
                // 3DES DUKPT always runs on a double-length IPEK
                let dukpt_algorithm = if algorithm.is_des_family() {
                    KeyAlgorithm::Tdes2Key
                } else {
                    algorithm
                };
                ped.write_dukpt_initial_key(cmd.key_slot, dukpt_algorithm, &ipek, &ksn, expected)
                    .await?;
            }
            Encryption::Unsupported => {
                return Err(InjectError::rejected(
                    ErrorCode::InvalidKeyEncryptionType,
                    format!("encryption type '{}' is not supported", cmd.encryption_type),
                ))
            }
        }

        // the device knows the full check value; the host only sent four chars
        let kcv = match ped.key_info(cmd.key_slot, key_type).await {
            Ok(Some(KeyInfo { kcv: Some(kcv), .. })) => kcv.to_hex(),
            _ => wire_kcv(cmd),
        };
        Ok(Loaded { kcv, material })
    }

    /// The key the host says encrypts this one, checked against its KCV.
    fn resident_transport(
        &self,
        cmd: &InjectKeyCommand,
        types: &[KeyType],
    ) -> Result<KeyRecord, InjectError> {
        for key_type in types {
            let Some(record) = self.store.get_resident(cmd.ktk_slot, *key_type)? else {
                continue;
            };
            if !kcv_prefix_matches(&record.kcv, &cmd.ktk_checksum) {
                return Err(KeyError::TransportKcvMismatch {
                    expected: cmd.ktk_checksum.clone(),
                    actual: record.kcv,
                }
                .into());
            }
            debug!(
                ktk_slot = cmd.ktk_slot,
                ktk_type = %record.key_type,
                ktk_algorithm = %record.algorithm,
                "transport key found"
            );
            return Ok(record);
        }
        Err(KeyError::MissingTransportKey {
            slot: cmd.ktk_slot,
            key_type: KeyType::Transport,
        }
        .into())
    }

    fn record(
        &self,
        cmd: &InjectKeyCommand,
        key_type: KeyType,
        algorithm: KeyAlgorithm,
        outcome: &Result<Loaded, InjectError>,
    ) {
        let new = match outcome {
            Ok(loaded) => {
                let mut new = NewKey::new(key_type, algorithm, loaded.kcv.as_str())
                    .slot(cmd.key_slot)
                    .status(KeyStatus::Successful);
                if key_type == KeyType::Transport {
                    new = new
                        .role(KekRole::Transport)
                        .label(format!("KTK slot {}", cmd.key_slot));
                    if let Some(material) = &loaded.material {
                        new = new.material(material);
                    }
                }
                new
            }
            Err(_) => NewKey::new(key_type, algorithm, wire_kcv(cmd))
                .slot(cmd.key_slot)
                .status(KeyStatus::Failed),
        };
        if let Err(e) = self.store.record_injection(new) {
            warn!(slot = cmd.key_slot, key_type = %key_type, "could not record injection: {e}");
        }
    }

    // ── Serial number ────────────────────────────────────────────────────────

    fn write_serial(&self, serial: &str) -> Vec<u8> {
        let code = if serial.len() != SERIAL_LEN {
            ErrorCode::InvalidLength
        } else if !serial.chars().all(|c| c.is_ascii_alphanumeric()) {
            ErrorCode::UnsupportedCharacters
        } else {
            *self.serial.write().unwrap_or_else(PoisonError::into_inner) = serial.to_string();
            info!(serial = %serial, "device serial updated");
            ErrorCode::Successful
        };
        if !code.is_success() {
            warn!(len = serial.len(), response = %code, "serial number rejected");
        }
        write_serial_response(code)
    }

    // ── Deletion ─────────────────────────────────────────────────────────────

    async fn delete_all(&self) -> Vec<u8> {
        let report = match self.store.validate_all_deletions() {
            Ok(report) => report,
            Err(e) => {
                warn!("delete all: safety check failed: {e}");
                return delete_all_response(ErrorCode::KeyDeletionFailed);
            }
        };
        let blocked: Vec<_> = report.blocked.iter().filter(|b| b.slot.is_some()).collect();
        if !blocked.is_empty() {
            for key in &blocked {
                warn!(kcv = %key.kcv, slot = ?key.slot, reason = %key.reason, "key blocks delete all");
            }
            warn!(
                blocked = blocked.len(),
                kcvs = %blocking_kcvs(&blocked),
                "delete all refused: release these keys first (keys check <KCV>)"
            );
            return delete_all_response(ErrorCode::KeyDeletionFailed);
        }

        if let Err(e) = self.ped.lock().await.delete_all_keys().await {
            warn!("delete all: PED refused: {e}");
            return delete_all_response(ErrorCode::KeyDeletionFailed);
        }
        match self.store.delete_all() {
            Ok(report) => {
                info!(removed = report.deletable, "all PED keys deleted");
                delete_all_response(ErrorCode::Successful)
            }
            Err(e) => {
                warn!("delete all: PED erased but store update failed: {e}");
                delete_all_response(ErrorCode::KeyDeletionFailed)
            }
        }
    }

    async fn delete_single(&self, slot: u32, host_type: &str) -> Vec<u8> {
        match self.try_delete_single(slot, host_type).await {
            Ok(kcv) => {
                info!(slot, kcv = %kcv, "key deleted");
                delete_single_response(ErrorCode::Successful)
            }
            Err(reason) => {
                warn!(slot, key_type = %host_type, "delete refused: {reason}");
                delete_single_response(ErrorCode::KeyDeletionFailed)
            }
        }
    }

    async fn try_delete_single(&self, slot: u32, host_type: &str) -> Result<String, String> {
        let mut found = None;
        for key_type in keymap::delete_candidates(host_type) {
            if let Some(record) = self
                .store
                .get_resident(slot, *key_type)
                .map_err(|e| e.to_string())?
            {
                found = Some(record);
                break;
            }
        }
        let record = found.ok_or_else(|| "no recorded key at this slot".to_string())?;

        let check = self
            .store
            .validate_deletion(&record.kcv)
            .map_err(|e| e.to_string())?;
        if let Some(reason) = check.reason {
            return Err(format!("key {} is protected: {reason}", record.kcv));
        }

        self.ped
            .lock()
            .await
            .delete_key(slot, record.key_type)
            .await
            .map_err(|e| e.to_string())?;
        self.store
            .delete(&record.kcv)
            .map_err(|e| e.to_string())?;
        Ok(record.kcv)
    }

    // ── Brand ────────────────────────────────────────────────────────────────

    fn validate_brand(&self, expected: &str) -> Vec<u8> {
        let actual = self.link.device_brand;
        let expected_brand = DeviceBrand::from_wire_code(expected);
        let matched = expected_brand == DeviceBrand::Unknown || expected_brand == actual;
        if !matched {
            warn!(expected = %expected, actual = actual.wire_code(), "device brand mismatch");
        }
        brand_response(matched, actual.wire_code())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Checksum the PED should verify, if the host sent a meaningful one.
/// `08D7B4 (IS_ACTIVE_KTK), 3FD539 (IN_USE_BY_PROFILES)`
fn blocking_kcvs(blocked: &[&BlockedKey]) -> String {
    blocked
        .iter()
        .map(|b| format!("{} ({})", b.kcv, b.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

fn expected_kcv(cmd: &InjectKeyCommand) -> Option<&str> {
    let checksum = cmd.key_checksum.trim();
    let legacy_placeholder = cmd.version == LEGACY_VERSION && checksum == NO_CHECKSUM;
    (!checksum.is_empty() && !legacy_placeholder).then_some(checksum)
}

fn wire_kcv(cmd: &InjectKeyCommand) -> String {
    let checksum = cmd.key_checksum.trim();
    if checksum.is_empty() {
        NO_CHECKSUM.to_string()
    } else {
        checksum.to_ascii_uppercase()
    }
}

fn decode_key(key_hex: &str) -> Result<Zeroizing<Vec<u8>>, InjectError> {
    hex::decode(key_hex.trim())
        .map(Zeroizing::new)
        .map_err(|e| InjectError::rejected(ErrorCode::UnsupportedCharacters, format!("key data: {e}")))
}

fn decode_ksn(ksn: &str) -> Result<Vec<u8>, InjectError> {
    hex::decode(ksn.trim())
        .map_err(|e| InjectError::rejected(ErrorCode::InvalidKsn, format!("KSN: {e}")))
}

/// Inject payloads carry key data, so only their shape is logged.
fn log_parse_error(raw: &[u8], message: &str) {
    let code = raw.get(..2).map(String::from_utf8_lossy);
    let carries_key = matches!(
        code.as_deref(),
        Some(code::INJECT_SYMMETRIC_KEY | code::LEGACY_INJECT_DUKPT | code::LEGACY_INJECT_MASTER)
    );
    if carries_key {
        warn!(code = ?code, len = raw.len(), "unparseable command: {message}");
    } else {
        warn!(raw = %String::from_utf8_lossy(raw), "unparseable command: {message}");
    }
}
