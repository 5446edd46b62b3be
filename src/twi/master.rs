// Licensed under the Apache-2.0 license

//! Interrupt-driven master transaction engine.
//!
//! One [`TwiMaster`] owns one physical bus. An initiator takes the bus lock,
//! describes the transaction and writes the address register; from then on
//! every bus event runs [`TwiMaster::interrupt_handler`] until the transaction
//! reaches a terminal state, at which point the initiator's blocking call
//! returns.
//!
//! ```text
//! transfer() ──acquire──► write_address ──► WIF/RIF ... ──► STOP ──► release()
//!                                           (interrupt_handler)
//! ```

use crate::common::{Logger, NoOpLogger};
use crate::twi::bus_lock::BusLock;
use crate::twi::common::{
    address_byte, BusControl, BusState, Direction, Error, MasterCommand, MasterControl,
    MasterStatus, Package, TransferStatus, TwiOptions, MAX_ADDRESS, MAX_REGISTER_ADDRESS_LEN,
};
use crate::twi::traits::{TwiInterrupt, TwiMasterRegisters};
use core::cell::RefCell;
use critical_section::Mutex;
use heapless::Vec;

/// Caller memory lent to the engine for one transaction.
#[derive(Clone, Copy, Debug)]
enum DataBuffer {
    Read { ptr: *mut u8, len: usize },
    Write { ptr: *const u8, len: usize },
}

impl DataBuffer {
    fn reader(buf: &mut [u8]) -> Self {
        DataBuffer::Read {
            ptr: buf.as_mut_ptr(),
            len: buf.len(),
        }
    }

    fn writer(buf: &[u8]) -> Self {
        DataBuffer::Write {
            ptr: buf.as_ptr(),
            len: buf.len(),
        }
    }

    fn len(&self) -> usize {
        match *self {
            DataBuffer::Read { len, .. } | DataBuffer::Write { len, .. } => len,
        }
    }

    fn direction(&self) -> Direction {
        match self {
            DataBuffer::Read { .. } => Direction::Read,
            DataBuffer::Write { .. } => Direction::Write,
        }
    }
}

#[derive(Debug)]
struct ActiveTransfer {
    peer_address: u8,
    register_address: Vec<u8, MAX_REGISTER_ADDRESS_LEN>,
    data: DataBuffer,
    address_count: usize,
    data_count: usize,
}

// SAFETY: the pointers inside `data` are only dereferenced by the interrupt
// handler while the initiator that lent them waits in `release`.
unsafe impl Send for ActiveTransfer {}

struct EngineState<L> {
    active: Option<ActiveTransfer>,
    logger: L,
}

pub struct TwiMaster<R: TwiMasterRegisters, L: Logger = NoOpLogger> {
    regs: R,
    lock: BusLock,
    state: Mutex<RefCell<EngineState<L>>>,
}

impl<R: TwiMasterRegisters> TwiMaster<R, NoOpLogger> {
    pub const fn without_logging(regs: R) -> Self {
        Self::new(regs, NoOpLogger)
    }
}

impl<R: TwiMasterRegisters, L: Logger> TwiMaster<R, L> {
    /// Bind a register block. Hardware is not touched until [`Self::init`].
    pub const fn new(regs: R, logger: L) -> Self {
        Self {
            regs,
            lock: BusLock::new(),
            state: Mutex::new(RefCell::new(EngineState {
                active: None,
                logger,
            })),
        }
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }

    /// Program the baud rate, enable the module with read/write interrupts and
    /// force the bus monitor to idle.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArg`] if the options do not resolve to a baud register
    /// value. Nothing is written in that case.
    pub fn init(&self, options: &TwiOptions) -> Result<u8, Error> {
        let baud = options.resolve_baud()?;
        let wanted = options.bus_control();
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);

            let mut bus_ctrl = self.regs.read_bus_control();
            bus_ctrl.set(BusControl::FMPEN, wanted.contains(BusControl::FMPEN));
            bus_ctrl.set(BusControl::BRIDGEEN, wanted.contains(BusControl::BRIDGEEN));
            self.regs.write_bus_control(bus_ctrl);

            self.regs.write_baud(baud);
            self.regs.write_control(
                MasterControl::from_bits_retain(options.interrupt_level.bits())
                    | MasterControl::RIEN
                    | MasterControl::WIEN
                    | MasterControl::ENABLE,
            );
            self.regs.set_bus_line_state(BusState::Idle);

            state.active = None;
            state.logger.debug("twi master: initialized");
        });
        self.lock.reset();
        Ok(baud)
    }

    pub fn enable(&self) {
        critical_section::with(|_cs| {
            let ctrl = self.regs.read_control();
            self.regs.write_control(ctrl | MasterControl::ENABLE);
        });
    }

    pub fn disable(&self) {
        critical_section::with(|_cs| {
            let ctrl = self.regs.read_control();
            self.regs.write_control(ctrl - MasterControl::ENABLE);
        });
    }

    /// Switch fast mode plus (1 MHz) on or off.
    pub fn set_fast_mode_plus(&self, enabled: bool) {
        critical_section::with(|_cs| self.regs.set_bus_control(BusControl::FMPEN, enabled));
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Status of the current, or most recent, transaction.
    #[must_use]
    pub fn status(&self) -> TransferStatus {
        self.lock.status()
    }

    /// Run one transaction in `direction`, blocking until it is over.
    ///
    /// For [`Direction::Write`] the buffer is only read from.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArg`] for a peer address above 0x7F
    /// * [`Error::Busy`] if the bus is held and the package is non-blocking, or
    ///   arbitration was lost
    /// * [`Error::IoError`], [`Error::NoMemory`], [`Error::Protocol`] as
    ///   reported by the interrupt handler
    pub fn transfer(
        &self,
        package: &mut Package<&mut [u8]>,
        direction: Direction,
    ) -> Result<(), Error> {
        let data = match direction {
            Direction::Read => DataBuffer::reader(package.buffer),
            Direction::Write => DataBuffer::writer(package.buffer),
        };
        // SAFETY: `package.buffer` stays borrowed until `release` returns, and
        // the handler drops the pointer before publishing a terminal status.
        unsafe {
            self.start(
                package.peer_address,
                &package.register_address,
                data,
                package.non_blocking,
            )?;
        }
        self.lock.release(&self.regs)
    }

    /// Read `package.buffer.len()` bytes, after sending the register address
    /// bytes if there are any.
    ///
    /// # Errors
    ///
    /// See [`Self::transfer`].
    pub fn read(&self, package: &mut Package<&mut [u8]>) -> Result<(), Error> {
        self.transfer(package, Direction::Read)
    }

    /// Send the register address bytes followed by `package.buffer`.
    ///
    /// # Errors
    ///
    /// See [`Self::transfer`].
    pub fn write(&self, package: &Package<&[u8]>) -> Result<(), Error> {
        // SAFETY: as in `transfer`.
        unsafe {
            self.start(
                package.peer_address,
                &package.register_address,
                DataBuffer::writer(package.buffer),
                package.non_blocking,
            )?;
        }
        self.lock.release(&self.regs)
    }

    /// Take the lock, install the transfer and put the first address byte on
    /// the wire.
    ///
    /// # Safety
    ///
    /// The memory behind `data` must stay valid, and must not be touched by
    /// the caller, until the lock reports a terminal status.
    unsafe fn start(
        &self,
        peer_address: u8,
        register_address: &Vec<u8, MAX_REGISTER_ADDRESS_LEN>,
        data: DataBuffer,
        non_blocking: bool,
    ) -> Result<(), Error> {
        if peer_address > MAX_ADDRESS {
            return Err(Error::InvalidArg);
        }
        self.lock.acquire(non_blocking)?;

        // Only a plain read goes out with the read bit. A read behind register
        // bytes restarts later, and an empty transfer pings with the write bit.
        let first = if register_address.is_empty()
            && data.direction() == Direction::Read
            && data.len() > 0
        {
            Direction::Read
        } else {
            Direction::Write
        };

        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            state.active = Some(ActiveTransfer {
                peer_address,
                register_address: register_address.clone(),
                data,
                address_count: 0,
                data_count: 0,
            });
            state.logger.debug("twi master: start");
            self.regs.write_address(address_byte(peer_address, first));
        });
        Ok(())
    }

    /// Service one bus event. Wire this to the master interrupt vector.
    pub fn interrupt_handler(&self) {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let EngineState { active, logger } = &mut *state;
            let status = self.regs.read_status();

            let Some(xfer) = active.as_mut() else {
                let errors = status & (MasterStatus::ARBLOST | MasterStatus::BUSERR);
                if !errors.is_empty() {
                    self.regs.clear_status(errors);
                }
                logger.debug("twi master: event with no transfer in flight");
                return;
            };

            if let Some(outcome) = self.service(xfer, status, logger) {
                *active = None;
                self.lock.complete(outcome);
            }
        });
    }

    fn service(
        &self,
        xfer: &mut ActiveTransfer,
        status: MasterStatus,
        logger: &mut L,
    ) -> Option<TransferStatus> {
        if status.contains(MasterStatus::ARBLOST) {
            self.regs.clear_status(MasterStatus::ARBLOST);
            self.regs.issue_command(MasterCommand::Stop);
            logger.error("twi master: arbitration lost");
            Some(TransferStatus::Failed(Error::Busy))
        } else if status.intersects(MasterStatus::BUSERR | MasterStatus::RXACK) {
            if status.contains(MasterStatus::BUSERR) {
                self.regs.clear_status(MasterStatus::BUSERR);
            }
            self.regs.issue_command(MasterCommand::Stop);
            logger.error("twi master: bus error or nack");
            Some(TransferStatus::Failed(Error::IoError))
        } else if status.contains(MasterStatus::WIF) {
            self.on_write_done(xfer, logger)
        } else if status.contains(MasterStatus::RIF) {
            self.on_byte_received(xfer, logger)
        } else {
            self.regs.issue_command(MasterCommand::Stop);
            logger.error("twi master: unexpected event");
            Some(TransferStatus::Failed(Error::Protocol))
        }
    }

    fn on_write_done(&self, xfer: &mut ActiveTransfer, logger: &mut L) -> Option<TransferStatus> {
        if let Some(&byte) = xfer.register_address.get(xfer.address_count) {
            self.regs.write_data(byte);
            xfer.address_count += 1;
            return None;
        }

        match xfer.data {
            DataBuffer::Read { len, .. } if xfer.data_count < len => {
                self.regs
                    .write_address(address_byte(xfer.peer_address, Direction::Read));
                logger.debug("twi master: restart for read");
                None
            }
            DataBuffer::Write { ptr, len } if xfer.data_count < len => {
                // SAFETY: in bounds, and the buffer is alive per `start`.
                let byte = unsafe { ptr.add(xfer.data_count).read() };
                self.regs.write_data(byte);
                xfer.data_count += 1;
                None
            }
            _ => {
                self.regs.issue_command(MasterCommand::Stop);
                logger.debug("twi master: complete");
                Some(TransferStatus::Complete)
            }
        }
    }

    fn on_byte_received(
        &self,
        xfer: &mut ActiveTransfer,
        logger: &mut L,
    ) -> Option<TransferStatus> {
        let DataBuffer::Read { ptr, len } = xfer.data else {
            self.regs.issue_command(MasterCommand::Stop);
            logger.error("twi master: byte received during write");
            return Some(TransferStatus::Failed(Error::Protocol));
        };

        if xfer.data_count >= len {
            self.regs.issue_command(MasterCommand::Stop);
            logger.error("twi master: read buffer overflow");
            return Some(TransferStatus::Failed(Error::NoMemory));
        }

        let byte = self.regs.read_data();
        // SAFETY: in bounds, and the buffer is alive per `start`.
        unsafe { ptr.add(xfer.data_count).write(byte) };
        xfer.data_count += 1;

        if xfer.data_count < len {
            self.regs.issue_command(MasterCommand::ContinueReceive);
            None
        } else {
            self.regs.issue_command(MasterCommand::NackStop);
            logger.debug("twi master: complete");
            Some(TransferStatus::Complete)
        }
    }
}

impl<R: TwiMasterRegisters, L: Logger> TwiInterrupt for TwiMaster<R, L> {
    fn on_interrupt(&self) {
        self.interrupt_handler();
    }
}
