// Licensed under the Apache-2.0 license

//! embedded-hal front end for the master engine.
//!
//! Lets generic sensor and EEPROM drivers written against
//! [`embedded_hal::i2c::I2c`] run on a [`TwiMaster`]. The engine sends at most
//! three register bytes before turning a transaction around for a read, so only
//! the transaction shapes that fit that model are accepted.

use crate::common::{Logger, NoOpLogger};
use crate::twi::common::{Error, Package};
use crate::twi::master::TwiMaster;
use crate::twi::traits::TwiMasterRegisters;
use embedded_hal::i2c::{I2c, Operation, SevenBitAddress};

pub struct TwiController<'a, R: TwiMasterRegisters, L: Logger = NoOpLogger> {
    pub master: &'a TwiMaster<R, L>,
    /// Fail with [`Error::Busy`] instead of waiting for another initiator.
    pub non_blocking: bool,
}

impl<'a, R: TwiMasterRegisters, L: Logger> TwiController<'a, R, L> {
    pub fn new(master: &'a TwiMaster<R, L>) -> Self {
        Self {
            master,
            non_blocking: false,
        }
    }

    fn write_with_register(
        &self,
        addr: SevenBitAddress,
        register: &[u8],
        bytes: &[u8],
    ) -> Result<(), Error> {
        let package = Package::new(addr, bytes)
            .with_register_address(register)?
            .non_blocking(self.non_blocking);
        self.master.write(&package)
    }
}

impl<R: TwiMasterRegisters, L: Logger> embedded_hal::i2c::ErrorType for TwiController<'_, R, L> {
    type Error = Error;
}

impl<R: TwiMasterRegisters, L: Logger> I2c for TwiController<'_, R, L> {
    fn read(&mut self, addr: SevenBitAddress, buffer: &mut [u8]) -> Result<(), Self::Error> {
        let mut package = Package::new(addr, buffer).non_blocking(self.non_blocking);
        self.master.read(&mut package)
    }

    fn write(&mut self, addr: SevenBitAddress, bytes: &[u8]) -> Result<(), Self::Error> {
        self.write_with_register(addr, &[], bytes)
    }

    fn write_read(
        &mut self,
        addr: SevenBitAddress,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), Self::Error> {
        let mut package = Package::new(addr, buffer)
            .with_register_address(bytes)?
            .non_blocking(self.non_blocking);
        self.master.read(&mut package)
    }

    fn transaction(
        &mut self,
        addr: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        match operations {
            [] => self.write_with_register(addr, &[], &[]),
            [Operation::Read(buffer)] => self.read(addr, buffer),
            [Operation::Write(bytes)] => self.write(addr, bytes),
            [Operation::Write(register), Operation::Read(buffer)] => {
                self.write_read(addr, register, buffer)
            }
            [Operation::Write(register), Operation::Write(bytes)] => {
                self.write_with_register(addr, register, bytes)
            }
            _ => Err(Error::InvalidArg),
        }
    }
}
