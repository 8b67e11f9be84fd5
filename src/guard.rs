//! Single-slot reentrancy guards.
//!
//! A stream allows at most one read and at most one write in flight. Each
//! side owns an [`OperationSlot`]; an operation claims it with a
//! compare-and-swap on entry and the returned [`SlotGuard`] releases it on
//! drop, including on error and cancellation paths.
//!
//! This only detects reentrancy. A second claimant is rejected immediately
//! with [`StreamError::NestedCall`] rather than queued.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Operation, Result, StreamError};

/// One atomically-claimed busy flag.
#[derive(Debug, Default)]
pub struct OperationSlot {
    busy: AtomicBool,
}

impl OperationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an operation currently holds the slot.
    #[inline]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Claim the slot for `op`, or fail with `NestedCall(op)` if it is held.
    pub fn try_claim(&self, op: Operation) -> Result<SlotGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| StreamError::NestedCall(op))?;
        Ok(SlotGuard {
            slot: self,
            released: false,
        })
    }

    #[inline]
    fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Releases its [`OperationSlot`] when dropped.
#[derive(Debug)]
pub struct SlotGuard<'a> {
    slot: &'a OperationSlot,
    released: bool,
}

impl SlotGuard<'_> {
    /// Release the slot now.
    pub fn release(mut self) {
        if !self.released {
            self.slot.release();
            self.released = true;
        }
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.slot.release();
        }
    }
}

/// Claim the read and write slots together, as a handshake needs both.
///
/// On failure nothing stays claimed. The read slot is always claimed first.
pub fn claim_both<'a>(
    read: &'a OperationSlot,
    write: &'a OperationSlot,
    op: Operation,
) -> Result<(SlotGuard<'a>, SlotGuard<'a>)> {
    let r = read.try_claim(op)?;
    let w = write.try_claim(op)?;
    Ok((r, w))
}
