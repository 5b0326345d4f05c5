//! The level-triggered cancellation flag.
//!
//! Cancellation is cooperative: the runner trips the flag once, and every
//! suspension point re-checks it on resume. There is no forced kill.

use crate::engine::model::InterruptReason;
use crate::error::Error;
use std::sync::Mutex;

/// Shared cancellation state. First trip wins; later trips are no-ops.
#[derive(Debug, Default)]
pub struct Interrupt {
    reason: Mutex<Option<InterruptReason>>,
}

impl Interrupt {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the reason if unset. Returns `true` when this call tripped the
    /// flag.
    pub fn trip(&self, reason: InterruptReason) -> bool {
        let mut guard = self.reason.lock().expect("interrupt flag poisoned");
        if guard.is_none() {
            *guard = Some(reason);
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn get(&self) -> Option<InterruptReason> {
        *self.reason.lock().expect("interrupt flag poisoned")
    }

    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.get().is_some()
    }

    /// Raises `ScanInterrupted` when the flag is tripped. Called at every
    /// suspension point.
    ///
    /// # Errors
    ///
    /// `Error::Interrupted` carrying the trip reason.
    pub fn check(&self) -> Result<(), Error> {
        match self.get() {
            Some(reason) => Err(Error::interrupted(reason)),
            None => Ok(()),
        }
    }
}
