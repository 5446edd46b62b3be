// Licensed under the Apache-2.0 license

//! Interrupt-driven slave transaction engine.
//!
//! A [`TwiSlave`] answers a remote master addressing this device. Every
//! interrupt is dispatched on the slave status flags, in priority order:
//!
//! 1. bus error
//! 2. transmit collision
//! 3. address match
//! 4. stop condition
//! 5. data (receive or send, by the direction bit)
//!
//! Anything else completes the transaction with [`SlaveResult::Fail`].
//!
//! Received bytes land in a fixed receive buffer of `N` bytes and are handed to
//! the data callback one at a time. Bytes a master reads come from a fixed send
//! buffer of the same size, which the callback may rewrite. Application code
//! polls [`TwiSlave::result`] or [`TwiSlave::poll_result`] for the outcome.

use crate::common::{Logger, NoOpLogger};
use crate::twi::common::{
    BusControl, Error, InterruptLevel, SlaveCommand, SlaveControl, SlaveFlags, SlaveResult,
    SlaveState, SlaveStatus, MAX_ADDRESS,
};
use crate::twi::traits::{TwiInterrupt, TwiSlaveRegisters};
use core::cell::RefCell;
use core::convert::Infallible;
use critical_section::Mutex;

/// Default receive and send buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 8;

/// View handed to the data callback after each received byte.
pub struct Received<'a> {
    data: &'a [u8],
    send_buffer: &'a mut [u8],
    abort_requested: &'a mut bool,
}

impl Received<'_> {
    /// Bytes received so far in this transaction, newest last.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data
    }

    #[must_use]
    pub fn latest(&self) -> Option<u8> {
        self.data.last().copied()
    }

    /// Buffer the master will read from if it turns the transaction around.
    pub fn send_buffer(&mut self) -> &mut [u8] {
        self.send_buffer
    }

    /// Stop accepting data; the transaction completes as aborted.
    pub fn request_abort(&mut self) {
        *self.abort_requested = true;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    AddressMatched,
    Receiving,
    Sending,
}

struct SlaveEngine<F, L, const N: usize> {
    receive_buffer: [u8; N],
    send_buffer: [u8; N],
    bytes_received: usize,
    bytes_sent: usize,
    state: SlaveState,
    result: SlaveResult,
    abort_requested: bool,
    phase: Phase,
    address: Option<u8>,
    enabled: bool,
    on_data: F,
    logger: L,
}

pub struct TwiSlave<R, F, L = NoOpLogger, const N: usize = DEFAULT_BUFFER_SIZE>
where
    R: TwiSlaveRegisters,
    F: FnMut(&mut Received<'_>),
    L: Logger,
{
    regs: R,
    state: Mutex<RefCell<SlaveEngine<F, L, N>>>,
}

impl<R, F, L, const N: usize> TwiSlave<R, F, L, N>
where
    R: TwiSlaveRegisters,
    F: FnMut(&mut Received<'_>),
    L: Logger,
{
    /// Bind buffers, data callback and logger. Hardware is not touched until
    /// [`Self::init_module`].
    pub fn init_driver(regs: R, on_data: F, logger: L) -> Self {
        Self {
            regs,
            state: Mutex::new(RefCell::new(SlaveEngine {
                receive_buffer: [0; N],
                send_buffer: [0; N],
                bytes_received: 0,
                bytes_sent: 0,
                state: SlaveState::Ready,
                result: SlaveResult::Unknown,
                abort_requested: false,
                phase: Phase::Idle,
                address: None,
                enabled: false,
                on_data,
                logger,
            })),
        }
    }

    pub fn new(regs: R, on_data: F, logger: L) -> Self {
        Self::init_driver(regs, on_data, logger)
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }

    /// Program the slave address and enable the address and data interrupts at
    /// `level`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArg`] if `address` is not a 7-bit address.
    pub fn init_module(&self, address: u8, level: InterruptLevel) -> Result<(), Error> {
        if address > MAX_ADDRESS {
            return Err(Error::InvalidArg);
        }
        critical_section::with(|cs| {
            let mut engine = self.state.borrow_ref_mut(cs);
            self.regs.write_slave_address(address << 1);
            self.regs.write_slave_control(
                SlaveControl::from_bits_retain(level.bits())
                    | SlaveControl::DIEN
                    | SlaveControl::APIEN
                    | SlaveControl::ENABLE,
            );
            engine.address = Some(address);
            engine.enabled = true;
            engine.bytes_received = 0;
            engine.bytes_sent = 0;
            engine.state = SlaveState::Ready;
            engine.result = SlaveResult::Unknown;
            engine.phase = Phase::Idle;
            engine.logger.debug("twi slave: initialized");
        });
        Ok(())
    }

    pub fn enable(&self) {
        self.set_enabled(true);
    }

    pub fn disable(&self) {
        self.set_enabled(false);
    }

    fn set_enabled(&self, enabled: bool) {
        critical_section::with(|cs| {
            let mut ctrl = self.regs.read_slave_control();
            ctrl.set(SlaveControl::ENABLE, enabled);
            self.regs.write_slave_control(ctrl);
            self.state.borrow_ref_mut(cs).enabled = enabled;
        });
    }

    /// Slave side fast mode plus, only meaningful in bridge mode.
    pub fn set_fast_mode_plus(&self, enabled: bool) {
        critical_section::with(|_cs| self.regs.set_bus_control(BusControl::SFMPEN, enabled));
    }

    /// Ask the engine to refuse the next address match, or to cut the current
    /// receive short after the byte in flight.
    pub fn request_abort(&self) {
        critical_section::with(|cs| self.state.borrow_ref_mut(cs).abort_requested = true);
    }

    /// Replace the start of the send buffer.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArg`] if `data` is longer than the buffer.
    pub fn load_send_buffer(&self, data: &[u8]) -> Result<(), Error> {
        if data.len() > N {
            return Err(Error::InvalidArg);
        }
        critical_section::with(|cs| {
            let mut engine = self.state.borrow_ref_mut(cs);
            for (dst, src) in engine.send_buffer.iter_mut().zip(data) {
                *dst = *src;
            }
        });
        Ok(())
    }

    /// Copy the bytes received in the last transaction into `out` and return
    /// how many were copied. Nothing is returned after an aborted address
    /// match.
    pub fn read_received(&self, out: &mut [u8]) -> usize {
        critical_section::with(|cs| {
            let engine = self.state.borrow_ref(cs);
            let count = out.len().min(engine.bytes_received);
            for (dst, src) in out.iter_mut().zip(engine.receive_buffer.iter().take(count)) {
                *dst = *src;
            }
            count
        })
    }

    #[must_use]
    pub fn result(&self) -> SlaveResult {
        critical_section::with(|cs| self.state.borrow_ref(cs).result)
    }

    #[must_use]
    pub fn state(&self) -> SlaveState {
        critical_section::with(|cs| self.state.borrow_ref(cs).state)
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.state() == SlaveState::Busy
    }

    /// Result of the last transaction once the engine is back to ready.
    pub fn poll_result(&self) -> nb::Result<SlaveResult, Infallible> {
        critical_section::with(|cs| {
            let engine = self.state.borrow_ref(cs);
            match engine.state {
                SlaveState::Busy => Err(nb::Error::WouldBlock),
                SlaveState::Ready => Ok(engine.result),
            }
        })
    }

    #[must_use]
    pub fn bytes_received(&self) -> usize {
        critical_section::with(|cs| self.state.borrow_ref(cs).bytes_received)
    }

    #[must_use]
    pub fn bytes_sent(&self) -> usize {
        critical_section::with(|cs| self.state.borrow_ref(cs).bytes_sent)
    }

    #[must_use]
    pub fn status(&self) -> SlaveStatus {
        critical_section::with(|cs| {
            let engine = self.state.borrow_ref(cs);
            SlaveStatus {
                enabled: engine.enabled,
                address: engine.address,
                state: engine.state,
                rx_buffer_count: engine.bytes_received,
                tx_buffer_count: engine.bytes_sent,
                last_result: engine.result,
                error: engine.result.is_error(),
            }
        })
    }

    /// Service one bus event. Wire this to the slave interrupt vector.
    pub fn interrupt_handler(&self) {
        critical_section::with(|cs| {
            let mut engine = self.state.borrow_ref_mut(cs);
            let flags = self.regs.read_slave_status();

            if flags.contains(SlaveFlags::BUSERR) {
                engine.on_fault(&self.regs, SlaveFlags::BUSERR, SlaveResult::BusError);
            } else if flags.contains(SlaveFlags::COLL) {
                engine.on_fault(&self.regs, SlaveFlags::COLL, SlaveResult::TransmitCollision);
            } else if flags.contains(SlaveFlags::APIF | SlaveFlags::AP) {
                engine.on_address_match(&self.regs, flags);
            } else if flags.contains(SlaveFlags::APIF) {
                engine.on_stop(&self.regs);
            } else if flags.contains(SlaveFlags::DIF | SlaveFlags::DIR) {
                engine.on_send(&self.regs, flags);
            } else if flags.contains(SlaveFlags::DIF) {
                engine.on_receive(&self.regs);
            } else {
                self.regs.issue_slave_command(SlaveCommand::Complete);
                engine.finish(SlaveResult::Fail);
                engine.logger.error("twi slave: unexpected event");
            }
        });
    }
}

impl<R, F, L, const N: usize> TwiInterrupt for TwiSlave<R, F, L, N>
where
    R: TwiSlaveRegisters,
    F: FnMut(&mut Received<'_>),
    L: Logger,
{
    fn on_interrupt(&self) {
        self.interrupt_handler();
    }
}

// ================================================================================================
// Event handlers, run inside the interrupt critical section
// ================================================================================================

impl<F, L, const N: usize> SlaveEngine<F, L, N>
where
    F: FnMut(&mut Received<'_>),
    L: Logger,
{
    fn finish(&mut self, result: SlaveResult) {
        self.result = result;
        self.state = SlaveState::Ready;
        self.phase = Phase::Idle;
    }

    fn on_address_match<R: TwiSlaveRegisters>(&mut self, regs: &R, flags: SlaveFlags) {
        if self.abort_requested {
            self.abort_requested = false;
            self.bytes_received = 0;
            self.bytes_sent = 0;
            regs.issue_slave_command(SlaveCommand::Complete);
            self.finish(SlaveResult::Aborted);
            self.logger.debug("twi slave: address match refused, abort pending");
            return;
        }

        // A write may carry no data at all, so only its STOP ends it. A read
        // ends on the master's NACK.
        regs.set_stop_interrupt(!flags.contains(SlaveFlags::DIR));
        self.receive_buffer = [0; N];
        self.bytes_received = 0;
        self.bytes_sent = 0;
        self.state = SlaveState::Busy;
        self.result = SlaveResult::Unknown;
        self.phase = Phase::AddressMatched;
        regs.issue_slave_command(SlaveCommand::Respond);
        self.logger.debug("twi slave: address match");
    }

    fn on_receive<R: TwiSlaveRegisters>(&mut self, regs: &R) {
        let Some(slot) = self.receive_buffer.get_mut(self.bytes_received) else {
            regs.issue_slave_command(SlaveCommand::NackComplete);
            self.finish(SlaveResult::BufferOverflow);
            self.logger.error("twi slave: receive buffer overflow");
            return;
        };
        *slot = regs.read_slave_data();
        self.phase = Phase::Receiving;

        let received = self
            .receive_buffer
            .get(..=self.bytes_received)
            .unwrap_or_default();
        (self.on_data)(&mut Received {
            data: received,
            send_buffer: &mut self.send_buffer,
            abort_requested: &mut self.abort_requested,
        });
        self.bytes_received += 1;

        if self.abort_requested {
            self.abort_requested = false;
            regs.issue_slave_command(SlaveCommand::Complete);
            self.finish(SlaveResult::Aborted);
            self.logger.debug("twi slave: receive aborted");
        } else {
            regs.issue_slave_command(SlaveCommand::Respond);
        }
    }

    fn on_send<R: TwiSlaveRegisters>(&mut self, regs: &R, flags: SlaveFlags) {
        self.phase = Phase::Sending;

        // A NACK only ends the transfer once something has actually been sent.
        if self.bytes_sent > 0 && flags.contains(SlaveFlags::RXACK) {
            regs.issue_slave_command(SlaveCommand::Complete);
            self.finish(SlaveResult::Ok);
            self.logger.debug("twi slave: send complete");
            return;
        }

        match self.send_buffer.get(self.bytes_sent) {
            Some(&byte) => {
                regs.write_slave_data(byte);
                self.bytes_sent += 1;
                regs.issue_slave_command(SlaveCommand::Respond);
            }
            None => {
                regs.issue_slave_command(SlaveCommand::Complete);
                self.finish(SlaveResult::BufferOverflow);
                self.logger.error("twi slave: send buffer exhausted");
            }
        }
    }

    fn on_stop<R: TwiSlaveRegisters>(&mut self, regs: &R) {
        regs.clear_slave_status(SlaveFlags::APIF);
        if self.phase == Phase::Idle {
            return;
        }
        regs.set_stop_interrupt(false);
        self.finish(SlaveResult::Ok);
        self.logger.debug("twi slave: stop");
    }

    fn on_fault<R: TwiSlaveRegisters>(&mut self, regs: &R, flag: SlaveFlags, result: SlaveResult) {
        regs.clear_slave_status(flag);
        self.bytes_received = 0;
        self.bytes_sent = 0;
        self.finish(result);
        self.logger.error(match result {
            SlaveResult::BusError => "twi slave: bus error",
            _ => "twi slave: transmit collision",
        });
    }
}
