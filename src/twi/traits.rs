// Licensed under the Apache-2.0 license

//! # TWI Hardware Abstraction Traits
//!
//! The engines never touch memory-mapped registers directly. A platform crate
//! implements these small traits for its peripheral (or a test harness
//! implements them for a simulated wire) and hands the result to
//! [`TwiMaster`](crate::twi::master::TwiMaster) or
//! [`TwiSlave`](crate::twi::slave::TwiSlave).
//!
//! ## Trait Hierarchy
//!
//! ```text
//! TwiHardwareCore (shared control register)
//!     ├── TwiMasterRegisters (master register block)
//!     └── TwiSlaveRegisters (slave register block)
//! SystemClock (peripheral clock gating, external collaborator)
//! TwiInterrupt (ISR entry point, implemented by the engines)
//! ```
//!
//! All register accessors take `&self`: the register block is shared between
//! the initiating context and the interrupt handler, just like a PAC register
//! block is.

use crate::twi::common::{
    BusControl, BusState, MasterCommand, MasterControl, MasterStatus, SlaveCommand, SlaveControl,
    SlaveFlags,
};
use fugit::HertzU32;

/// Registers shared by the master and slave halves of one TWI module.
pub trait TwiHardwareCore {
    fn read_bus_control(&self) -> BusControl;
    fn write_bus_control(&self, ctrl: BusControl);

    /// Set or clear `flags` in the shared control register, leaving the rest alone.
    fn set_bus_control(&self, flags: BusControl, enabled: bool) {
        let mut ctrl = self.read_bus_control();
        ctrl.set(flags, enabled);
        self.write_bus_control(ctrl);
    }
}

/// Master register block.
pub trait TwiMasterRegisters: TwiHardwareCore {
    fn read_status(&self) -> MasterStatus;

    /// Write-one-to-clear the given status flags.
    fn clear_status(&self, flags: MasterStatus);

    fn read_control(&self) -> MasterControl;
    fn write_control(&self, ctrl: MasterControl);
    fn write_baud(&self, baud: u8);

    /// Writing the address register generates a START, or a repeated START
    /// while the bus is owned.
    fn write_address(&self, byte: u8);

    fn write_data(&self, byte: u8);
    fn read_data(&self) -> u8;
    fn issue_command(&self, cmd: MasterCommand);
    fn read_bus_line_state(&self) -> BusState;

    /// Force the bus monitor state, used once at init to leave `Unknown`.
    fn set_bus_line_state(&self, state: BusState);
}

/// Slave register block.
pub trait TwiSlaveRegisters: TwiHardwareCore {
    fn read_slave_status(&self) -> SlaveFlags;

    /// Write-one-to-clear the given status flags.
    fn clear_slave_status(&self, flags: SlaveFlags);

    fn read_slave_control(&self) -> SlaveControl;
    fn write_slave_control(&self, ctrl: SlaveControl);

    /// Address register contents: the 7-bit address shifted left by one.
    fn write_slave_address(&self, byte: u8);

    fn write_slave_data(&self, byte: u8);
    fn read_slave_data(&self) -> u8;
    fn issue_slave_command(&self, cmd: SlaveCommand);

    /// Mask or unmask the stop-condition interrupt.
    ///
    /// The engine tracks receive/send phases itself, so hardware without a
    /// separate stop mask can leave this as a no-op.
    fn set_stop_interrupt(&self, enabled: bool) {
        let mut ctrl = self.read_slave_control();
        ctrl.set(SlaveControl::PIEN, enabled);
        self.write_slave_control(ctrl);
    }
}

/// Identifies one TWI module for clock gating.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TwiInstance {
    TwiC,
    TwiD,
    TwiE,
    TwiF,
}

/// Peripheral clock control, provided by the platform.
pub trait SystemClock {
    type Error: core::fmt::Debug;

    fn enable_peripheral_clock(&mut self, instance: TwiInstance) -> Result<(), Self::Error>;

    fn peripheral_frequency(&self, instance: TwiInstance) -> Result<HertzU32, Self::Error>;
}

/// Interrupt entry point for one bus role.
///
/// The platform's vector table calls `on_interrupt` on whichever engines are
/// bound to the interrupt source, e.g. through a `&'static dyn TwiInterrupt`.
pub trait TwiInterrupt {
    fn on_interrupt(&self);
}
