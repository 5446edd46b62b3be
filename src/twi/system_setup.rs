// Licensed under the Apache-2.0 license

//! TWI System Setup Helper
//!
//! Brings a TWI module up from cold: peripheral clock first, then the module
//! registers. Clock control is reached through the [`SystemClock`] trait so the
//! engines stay free of platform clock trees.

use crate::common::Logger;
use crate::twi::common::{Error, TwiOptions};
use crate::twi::master::TwiMaster;
use crate::twi::traits::{SystemClock, TwiInstance, TwiMasterRegisters};

#[cfg(feature = "twi_slave")]
use crate::twi::common::InterruptLevel;
#[cfg(feature = "twi_slave")]
use crate::twi::slave::{Received, TwiSlave};
#[cfg(feature = "twi_slave")]
use crate::twi::traits::TwiSlaveRegisters;

/// Helper for TWI bring-up using a platform [`SystemClock`]
pub struct TwiSystemSetup;

impl TwiSystemSetup {
    /// Complete master initialization
    ///
    /// - enable the peripheral clock of `instance`
    /// - read its frequency into the options, for baud derivation
    /// - program the master
    ///
    /// # Returns
    ///
    /// * `Result<u8, Error>` - the baud register value written
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArg`] if the clock cannot be enabled or queried, or the
    /// options do not resolve to a baud register value.
    pub fn setup_master<C, R, L>(
        clock: &mut C,
        instance: TwiInstance,
        master: &TwiMaster<R, L>,
        options: &TwiOptions,
    ) -> Result<u8, Error>
    where
        C: SystemClock,
        R: TwiMasterRegisters,
        L: Logger,
    {
        clock
            .enable_peripheral_clock(instance)
            .map_err(|_| Error::InvalidArg)?;

        let mut options = *options;
        options.peripheral_clock = Some(
            clock
                .peripheral_frequency(instance)
                .map_err(|_| Error::InvalidArg)?,
        );

        master.init(&options)
    }

    /// Complete slave initialization: clock, then address and interrupts.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArg`] if the clock cannot be enabled or `address` is not
    /// a 7-bit address.
    #[cfg(feature = "twi_slave")]
    pub fn setup_slave<C, R, F, L, const N: usize>(
        clock: &mut C,
        instance: TwiInstance,
        slave: &TwiSlave<R, F, L, N>,
        address: u8,
        level: InterruptLevel,
    ) -> Result<(), Error>
    where
        C: SystemClock,
        R: TwiSlaveRegisters,
        F: FnMut(&mut Received<'_>),
        L: Logger,
    {
        clock
            .enable_peripheral_clock(instance)
            .map_err(|_| Error::InvalidArg)?;
        slave.init_module(address, level)
    }
}
