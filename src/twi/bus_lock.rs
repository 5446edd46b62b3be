// Licensed under the Apache-2.0 license

//! Single-flag gate serializing access to the master engine state.
//!
//! The lock is not a general mutex. It is taken by the initiator of a
//! transaction and it is the interrupt handler, acting for that initiator, that
//! publishes the terminal status which lets the initiator release it again.
//!
//! The flag and the status are plain atomics that are only ever loaded and
//! stored. The read-modify-write that claims the lock runs inside a critical
//! section, so targets without compare-and-swap are fine.

use crate::twi::common::{BusState, Error, TransferStatus};
use crate::twi::traits::TwiMasterRegisters;
use core::convert::Infallible;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

pub struct BusLock {
    locked: AtomicBool,
    status: AtomicU8,
}

impl Default for BusLock {
    fn default() -> Self {
        Self::new()
    }
}

impl BusLock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            status: AtomicU8::new(0),
        }
    }

    /// Claim the lock, spinning while it is held unless `non_blocking` is set.
    ///
    /// # Errors
    ///
    /// [`Error::Busy`] if `non_blocking` is set and the lock is held.
    pub fn acquire(&self, non_blocking: bool) -> Result<(), Error> {
        loop {
            match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(nb::Error::WouldBlock) if !non_blocking => core::hint::spin_loop(),
                Err(_) => return Err(Error::Busy),
            }
        }
    }

    /// Claim the lock if it is free. On success the status reads `InProgress`.
    pub fn try_acquire(&self) -> nb::Result<(), Infallible> {
        // Cheap check first so a spinning initiator never sits in a critical section.
        if self.locked.load(Ordering::Acquire) {
            return Err(nb::Error::WouldBlock);
        }
        critical_section::with(|_cs| {
            if self.locked.load(Ordering::Acquire) {
                return Err(nb::Error::WouldBlock);
            }
            self.status
                .store(TransferStatus::InProgress.to_bits(), Ordering::Release);
            self.locked.store(true, Ordering::Release);
            Ok(())
        })
    }

    /// Publish the terminal status of the current transaction. Called from the ISR.
    pub fn complete(&self, status: TransferStatus) {
        self.status.store(status.to_bits(), Ordering::Release);
    }

    #[must_use]
    pub fn status(&self) -> TransferStatus {
        TransferStatus::from_bits(self.status.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Release the lock once the transaction is terminal and the bus is idle.
    ///
    /// Returns `WouldBlock` until then, and the transaction's own error (if
    /// any) once the lock has been dropped.
    pub fn poll_release<R: TwiMasterRegisters>(&self, regs: &R) -> nb::Result<(), Error> {
        let status = self.status();
        if !status.is_terminal() {
            return Err(nb::Error::WouldBlock);
        }
        if regs.read_bus_line_state() != BusState::Idle {
            return Err(nb::Error::WouldBlock);
        }
        self.locked.store(false, Ordering::Release);
        status.into_result().map_err(nb::Error::Other)
    }

    /// Wait for the transaction to end and release the lock.
    ///
    /// # Errors
    ///
    /// The terminal error of the transaction.
    pub fn release<R: TwiMasterRegisters>(&self, regs: &R) -> Result<(), Error> {
        nb::block!(self.poll_release(regs))
    }

    /// Drop the lock without waiting, used when (re)initializing the module.
    pub(crate) fn reset(&self) {
        critical_section::with(|_cs| {
            self.status
                .store(TransferStatus::Complete.to_bits(), Ordering::Release);
            self.locked.store(false, Ordering::Release);
        });
    }
}
