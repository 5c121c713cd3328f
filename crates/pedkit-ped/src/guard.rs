//! Cancellable, bounded device calls.
//!
//! Every call that waits on the PED races the caller's cancellation token
//! and an upper-bound timer. When either wins, the device is told to abort
//! before the call resolves, so the hardware never keeps working on a
//! request nobody is waiting for.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{PedError, PedResult};
use crate::request::{CipherRequest, CipherResult, MacRequest, MacResult};
use crate::Ped;

pub(crate) enum Raced<T> {
    Device(T),
    Cancelled,
    GuardExpired,
}

/// Drive `op` until it finishes, `cancel` fires or `limit` elapses.
pub(crate) async fn race<T>(
    op: impl Future<Output = T>,
    cancel: &CancellationToken,
    limit: Duration,
) -> Raced<T> {
    tokio::select! {
        res = op => Raced::Device(res),
        _ = cancel.cancelled() => Raced::Cancelled,
        _ = tokio::time::sleep(limit) => Raced::GuardExpired,
    }
}

/// Overall limit for a call the device itself bounds by `device_secs`.
pub(crate) fn upper_bound(device_secs: u64, guard: Duration) -> Duration {
    Duration::from_secs(device_secs).saturating_add(guard)
}

async fn settle<P: Ped, T>(
    ped: &mut P,
    what: &'static str,
    raced: Raced<PedResult<T>>,
    guard: Duration,
) -> PedResult<T> {
    match raced {
        Raced::Device(res) => res,
        Raced::Cancelled => {
            debug!(op = what, "device call cancelled by caller");
            ped.abort_operation().await;
            Err(PedError::Cancelled)
        }
        Raced::GuardExpired => {
            warn!(op = what, guard_secs = guard.as_secs(), "PED stopped answering, aborting");
            ped.abort_operation().await;
            Err(PedError::Timeout)
        }
    }
}

pub async fn encrypt<P: Ped>(
    ped: &mut P,
    request: &CipherRequest,
    cancel: &CancellationToken,
    guard: Duration,
) -> PedResult<CipherResult> {
    if cancel.is_cancelled() {
        return Err(PedError::Cancelled);
    }
    let raced = race(ped.encrypt(request), cancel, guard).await;
    settle(ped, "encrypt", raced, guard).await
}

pub async fn decrypt<P: Ped>(
    ped: &mut P,
    request: &CipherRequest,
    cancel: &CancellationToken,
    guard: Duration,
) -> PedResult<CipherResult> {
    if cancel.is_cancelled() {
        return Err(PedError::Cancelled);
    }
    let raced = race(ped.decrypt(request), cancel, guard).await;
    settle(ped, "decrypt", raced, guard).await
}

pub async fn calculate_mac<P: Ped>(
    ped: &mut P,
    request: &MacRequest,
    cancel: &CancellationToken,
    guard: Duration,
) -> PedResult<MacResult> {
    if cancel.is_cancelled() {
        return Err(PedError::Cancelled);
    }
    let raced = race(ped.calculate_mac(request), cancel, guard).await;
    settle(ped, "mac", raced, guard).await
}
