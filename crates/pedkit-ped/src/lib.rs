//! pedkit-ped: manufacturer-agnostic PED capability interface
//!
//! ```text
//!   dispatcher ──► Ped (trait) ──► SimulatedPed
//!                              └─► vendor adapters (code tables in vendor/)
//! ```
//!
//! The PED never persists key metadata; it only reflects hardware state.
//! Vendor error codes are translated into [`PedError`] / [`KeyError`] at the
//! adapter boundary, so callers never learn which hardware family answered.

pub mod error;
pub mod guard;
pub mod keysystem;
pub mod pin;
pub mod request;
pub mod sim;
pub mod vendor;

use std::future::Future;

pub use error::{KeyError, PedError, PedResult};
pub use keysystem::{KeyFamily, KeySystem};
pub use request::{
    CipherRequest, CipherResult, DeviceInfo, DukptInfo, DukptUse, EncryptedKey, KeyInfo,
    MacRequest, MacResult, PedStatus, PinLength, PinRequest, PinResult,
};
pub use sim::{PinPad, SimulatedPed};

use pedkit_core::{KeyAlgorithm, KeyType};

/// Capability interface of one physical PED.
///
/// Methods take `&mut self`: firmware is stateful and non-reentrant, so one
/// owner drives a device at a time and concurrent callers queue on that owner.
pub trait Ped: Send {
    // ── Status ───────────────────────────────────────────────────────────────

    fn status(&mut self) -> impl Future<Output = PedResult<PedStatus>> + Send;

    fn config(&mut self) -> impl Future<Output = PedResult<DeviceInfo>> + Send;

    // ── Key management ───────────────────────────────────────────────────────

    /// Load a key encrypted under the resident key at `transport_slot`.
    /// The device checks the KCV itself when one is given.
    fn write_key(
        &mut self,
        slot: u32,
        key_type: KeyType,
        algorithm: KeyAlgorithm,
        key: &EncryptedKey,
        transport_slot: u32,
        transport_type: KeyType,
    ) -> impl Future<Output = Result<(), KeyError>> + Send;

    /// Load a top-level key in the clear (provisioning only).
    fn write_key_plain(
        &mut self,
        slot: u32,
        key_type: KeyType,
        algorithm: KeyAlgorithm,
        key: &[u8],
        kcv: Option<&str>,
    ) -> impl Future<Output = Result<(), KeyError>> + Send;

    fn delete_key(
        &mut self,
        slot: u32,
        key_type: KeyType,
    ) -> impl Future<Output = Result<(), KeyError>> + Send;

    fn delete_all_keys(&mut self) -> impl Future<Output = Result<(), KeyError>> + Send;

    fn is_key_present(
        &mut self,
        slot: u32,
        key_type: KeyType,
    ) -> impl Future<Output = bool> + Send;

    fn key_info(
        &mut self,
        slot: u32,
        key_type: KeyType,
    ) -> impl Future<Output = PedResult<Option<KeyInfo>>> + Send;

    // ── DUKPT ────────────────────────────────────────────────────────────────

    fn write_dukpt_initial_key(
        &mut self,
        group: u32,
        algorithm: KeyAlgorithm,
        ipek: &[u8],
        initial_ksn: &[u8],
        kcv: Option<&str>,
    ) -> impl Future<Output = Result<(), KeyError>> + Send;

    /// Load an IPEK encrypted under the transport key at `transport_slot`.
    fn write_dukpt_initial_key_encrypted(
        &mut self,
        group: u32,
        algorithm: KeyAlgorithm,
        encrypted_ipek: &[u8],
        initial_ksn: &[u8],
        transport_slot: u32,
        kcv: Option<&str>,
    ) -> impl Future<Output = Result<(), KeyError>> + Send;

    fn dukpt_info(&mut self, group: u32)
        -> impl Future<Output = PedResult<Option<DukptInfo>>> + Send;

    fn increment_dukpt_ksn(&mut self, group: u32) -> impl Future<Output = PedResult<()>> + Send;

    // ── Cryptography ─────────────────────────────────────────────────────────

    fn encrypt(
        &mut self,
        request: &CipherRequest,
    ) -> impl Future<Output = PedResult<CipherResult>> + Send;

    fn decrypt(
        &mut self,
        request: &CipherRequest,
    ) -> impl Future<Output = PedResult<CipherResult>> + Send;

    fn calculate_mac(
        &mut self,
        request: &MacRequest,
    ) -> impl Future<Output = PedResult<MacResult>> + Send;

    /// Tell the hardware to drop an encrypt, decrypt or MAC call in flight.
    /// [`guard`] issues this when it stops waiting on one.
    fn abort_operation(&mut self) -> impl Future<Output = ()> + Send;

    fn random_bytes(&mut self, len: usize) -> impl Future<Output = PedResult<Vec<u8>>> + Send;

    // ── PIN entry ────────────────────────────────────────────────────────────

    /// Wait for the cardholder to enter a PIN. Use [`pin::get_pin_block`]
    /// rather than calling this directly: it adds cancellation and an
    /// upper-bound guard.
    fn get_pin_block(
        &mut self,
        request: &PinRequest,
    ) -> impl Future<Output = PedResult<PinResult>> + Send;

    /// Tell the hardware to abandon any PIN entry in progress.
    fn cancel_pin_entry(&mut self) -> impl Future<Output = ()> + Send;
}
