//! Cancellable, bounded PIN entry.
//!
//! The hardware enforces the caller's timeout, but a misbehaving binding
//! must not hang the calling task. [`get_pin_block`] races the device call
//! against the caller's cancellation token and against
//! `timeout_secs + guard`. Whenever it gives up on the device it first issues
//! `cancel_pin_entry()` so the PED and the caller agree that entry is over.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{PedError, PedResult};
use crate::guard::{race, upper_bound, Raced};
use crate::request::{PinRequest, PinResult};
use crate::Ped;

/// Request a PIN block with cancellation and an upper-bound guard.
pub async fn get_pin_block<P: Ped>(
    ped: &mut P,
    request: &PinRequest,
    cancel: &CancellationToken,
    guard: Duration,
) -> PedResult<PinResult> {
    if cancel.is_cancelled() {
        return Err(PedError::Cancelled);
    }
    let limit = upper_bound(request.timeout_secs, guard);

    match race(ped.get_pin_block(request), cancel, limit).await {
        Raced::Device(res) => {
            if let Err(e) = &res {
                debug!(slot = request.slot, error = %e, "PIN entry ended without a block");
            }
            res
        }
        Raced::Cancelled => {
            debug!(slot = request.slot, "PIN entry cancelled by caller");
            ped.cancel_pin_entry().await;
            Err(PedError::Cancelled)
        }
        Raced::GuardExpired => {
            warn!(
                slot = request.slot,
                limit_secs = limit.as_secs(),
                "PED did not honour its PIN timeout, aborting entry"
            );
            ped.cancel_pin_entry().await;
            Err(PedError::Timeout)
        }
    }
}
