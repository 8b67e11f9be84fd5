//! Connection state flags and the sticky failure slot.
//!
//! The state is a few independent flags rather than one enum, since a
//! stream can be authenticated, have sent its shutdown and be faulted all
//! at once:
//!
//! - `handshake_completed`: at least one handshake succeeded.
//! - `shutdown_sent`: the close notification went out; writes are refused.
//! - `failure`: `None`, then `Faulted(error)`, then `Disposed`. It only
//!   moves forward and is never cleared. Every public entry point replays it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::error::{Result, StreamError};

/// Terminal condition captured in the failure slot.
#[derive(Debug, Clone)]
pub enum Failure {
    Faulted(StreamError),
    Disposed,
}

impl Failure {
    fn to_error(&self) -> StreamError {
        match self {
            Failure::Faulted(err) => err.clone(),
            Failure::Disposed => StreamError::Disposed,
        }
    }
}

#[derive(Debug, Default)]
pub struct ConnectionState {
    handshake_completed: AtomicBool,
    shutdown_sent: AtomicBool,
    failure: Mutex<Option<Failure>>,
    disposed: CancellationToken,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handshake has completed at least once.
    #[inline]
    pub fn is_authenticated(&self) -> bool {
        self.handshake_completed.load(Ordering::Acquire)
    }

    pub fn mark_authenticated(&self) {
        self.handshake_completed.store(true, Ordering::Release);
    }

    /// The close notification has been written.
    #[inline]
    pub fn is_shutdown_sent(&self) -> bool {
        self.shutdown_sent.load(Ordering::Acquire)
    }

    pub fn mark_shutdown_sent(&self) {
        self.shutdown_sent.store(true, Ordering::Release);
    }

    pub fn failure(&self) -> Option<Failure> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self.failure(), Some(Failure::Disposed))
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self.failure(), Some(Failure::Faulted(_)))
    }

    /// Replay the captured failure, if any.
    pub fn check(&self) -> Result<()> {
        match self.failure() {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }

    /// Capture `err` unless a failure is already recorded.
    pub fn record_fault(&self, err: &StreamError) {
        let mut slot = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            tracing::warn!(error = %err, "stream faulted");
            *slot = Some(Failure::Faulted(err.clone()));
        }
    }

    /// Record sticky errors from `result` and pass it through.
    pub fn settle<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_sticky() {
                self.record_fault(err);
            }
        }
        result
    }

    /// Move to the disposed state and wake suspended operations.
    ///
    /// Returns false if the stream was already disposed.
    pub fn dispose(&self) -> bool {
        {
            let mut slot = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(*slot, Some(Failure::Disposed)) {
                return false;
            }
            *slot = Some(Failure::Disposed);
        }
        self.disposed.cancel();
        true
    }

    /// Cancelled once the stream is disposed.
    pub fn disposal_token(&self) -> &CancellationToken {
        &self.disposed
    }

    /// Arm a guard that faults the stream with `Cancelled` if dropped
    /// before [`CancelGuard::disarm`].
    pub fn arm(&self) -> CancelGuard<'_> {
        CancelGuard {
            state: self,
            armed: true,
        }
    }
}

/// Faults the stream when an in-flight operation's future is dropped.
#[derive(Debug)]
pub struct CancelGuard<'a> {
    state: &'a ConnectionState,
    armed: bool,
}

impl CancelGuard<'_> {
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!("operation dropped at a suspension point");
            self.state.record_fault(&StreamError::Cancelled);
        }
    }
}
