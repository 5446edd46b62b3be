// Licensed under the Apache-2.0 license

//! Common types and constants for the TWI driver modules.
//!
//! This module provides shared definitions for error handling, register fields,
//! configuration and protocol utilities used across the master and slave engines.

use bitflags::bitflags;
use core::fmt;
use fugit::HertzU32;
use heapless::Vec;

/// Highest valid 7-bit bus address.
pub const MAX_ADDRESS: u8 = 0x7F;

/// Maximum number of register/command bytes sent ahead of the data phase.
pub const MAX_REGISTER_ADDRESS_LEN: usize = 3;

/// Errors reported to a bus initiator.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Bus lock held by another initiator, or arbitration lost to another master.
    Busy,
    /// Bus error or the peer did not acknowledge.
    IoError,
    /// The peer kept sending after the read buffer was full.
    NoMemory,
    /// The controller raised an event the state machine does not expect.
    Protocol,
    /// Bad initialization or transfer parameters.
    InvalidArg,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::Busy => "bus busy",
            Error::IoError => "bus error or nack",
            Error::NoMemory => "read buffer overflow",
            Error::Protocol => "unexpected bus event",
            Error::InvalidArg => "invalid argument",
        };
        f.write_str(msg)
    }
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        use embedded_hal::i2c::ErrorKind;
        match self {
            Error::IoError => ErrorKind::Bus,
            Error::Busy => ErrorKind::ArbitrationLoss,
            Error::NoMemory => ErrorKind::Overrun,
            Error::Protocol | Error::InvalidArg => ErrorKind::Other,
        }
    }
}

/// Transfer direction as seen from the master.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Progress of the transaction owned by the master engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferStatus {
    InProgress,
    Complete,
    Failed(Error),
}

impl TransferStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self != TransferStatus::InProgress
    }

    pub fn into_result(self) -> Result<(), Error> {
        match self {
            TransferStatus::Complete => Ok(()),
            TransferStatus::Failed(err) => Err(err),
            // Only reachable if a caller inspects a transfer still on the wire.
            TransferStatus::InProgress => Err(Error::Busy),
        }
    }

    pub(crate) fn to_bits(self) -> u8 {
        match self {
            TransferStatus::Complete => 0,
            TransferStatus::InProgress => 1,
            TransferStatus::Failed(Error::Busy) => 2,
            TransferStatus::Failed(Error::IoError) => 3,
            TransferStatus::Failed(Error::NoMemory) => 4,
            TransferStatus::Failed(Error::Protocol) => 5,
            TransferStatus::Failed(Error::InvalidArg) => 6,
        }
    }

    pub(crate) fn from_bits(bits: u8) -> Self {
        match bits {
            0 => TransferStatus::Complete,
            1 => TransferStatus::InProgress,
            2 => TransferStatus::Failed(Error::Busy),
            3 => TransferStatus::Failed(Error::IoError),
            4 => TransferStatus::Failed(Error::NoMemory),
            5 => TransferStatus::Failed(Error::Protocol),
            _ => TransferStatus::Failed(Error::InvalidArg),
        }
    }
}

/// Whether the slave engine is inside a transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlaveState {
    Ready,
    Busy,
}

/// Outcome of the most recent slave transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlaveResult {
    Unknown,
    Ok,
    BufferOverflow,
    TransmitCollision,
    BusError,
    Fail,
    Aborted,
}

impl SlaveResult {
    #[must_use]
    pub fn is_error(self) -> bool {
        !matches!(self, SlaveResult::Unknown | SlaveResult::Ok)
    }
}

/// Status information for TWI slave operations
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SlaveStatus {
    /// Whether slave mode is currently enabled
    pub enabled: bool,
    /// Current slave address (if programmed)
    pub address: Option<u8>,
    /// Transaction state
    pub state: SlaveState,
    /// Number of bytes in receive buffer
    pub rx_buffer_count: usize,
    /// Number of bytes sent from the transmit buffer
    pub tx_buffer_count: usize,
    /// Result of the last transaction
    pub last_result: SlaveResult,
    /// Whether the last transaction ended in an error
    pub error: bool,
}

/// Line state reported by the controller's bus monitor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BusState {
    Unknown = 0,
    Idle = 1,
    Owner = 2,
    Busy = 3,
}

impl BusState {
    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            1 => BusState::Idle,
            2 => BusState::Owner,
            3 => BusState::Busy,
            _ => BusState::Unknown,
        }
    }
}

/// Interrupt priority level written into the module control registers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum InterruptLevel {
    Off = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl InterruptLevel {
    #[must_use]
    pub fn bits(self) -> u8 {
        (self as u8) << 6
    }
}

bitflags! {
    /// Shared control register.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct BusControl: u8 {
        /// Bridge mode: master and slave use separate pin pairs.
        const BRIDGEEN = 0x80;
        /// Slave fast mode plus (1 MHz) in bridge mode.
        const SFMPEN = 0x40;
        /// Fast mode plus (1 MHz).
        const FMPEN = 0x08;
        /// External driver interface.
        const EDIEN = 0x01;
    }
}

bitflags! {
    /// Master control register A.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct MasterControl: u8 {
        const INTLVL = 0xC0;
        const RIEN = 0x20;
        const WIEN = 0x10;
        const ENABLE = 0x08;
    }
}

bitflags! {
    /// Master status register.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct MasterStatus: u8 {
        /// A byte has been received.
        const RIF = 0x80;
        /// A byte (or the address) has been sent.
        const WIF = 0x40;
        const CLKHOLD = 0x20;
        /// Peer answered NACK.
        const RXACK = 0x10;
        const ARBLOST = 0x08;
        const BUSERR = 0x04;
        const BUSSTATE = 0x03;
    }
}

impl MasterStatus {
    #[must_use]
    pub fn bus_state(self) -> BusState {
        BusState::from_bits(self.bits())
    }
}

bitflags! {
    /// Slave control register A.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct SlaveControl: u8 {
        const INTLVL = 0xC0;
        /// Data interrupt enable.
        const DIEN = 0x20;
        /// Address/stop interrupt enable.
        const APIEN = 0x10;
        const ENABLE = 0x08;
        /// Stop interrupt enable.
        const PIEN = 0x04;
        /// Promiscuous mode.
        const PMEN = 0x02;
        /// Smart mode.
        const SMEN = 0x01;
    }
}

bitflags! {
    /// Slave status register.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct SlaveFlags: u8 {
        /// Data interrupt.
        const DIF = 0x80;
        /// Address or stop interrupt.
        const APIF = 0x40;
        const CLKHOLD = 0x20;
        /// Master answered NACK to the last byte we sent.
        const RXACK = 0x10;
        const COLL = 0x08;
        const BUSERR = 0x04;
        /// Set when the master is reading.
        const DIR = 0x02;
        /// Set when APIF was raised by an address match rather than a stop.
        const AP = 0x01;
    }
}

/// Commands accepted by the master command field.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MasterCommand {
    /// ACK the byte just received and clock in the next one.
    ContinueReceive,
    Stop,
    /// NACK the byte just received, then STOP.
    NackStop,
}

impl MasterCommand {
    const ACKACT: u8 = 0x04;

    #[must_use]
    pub fn bits(self) -> u8 {
        match self {
            MasterCommand::ContinueReceive => 0x02,
            MasterCommand::Stop => 0x03,
            MasterCommand::NackStop => Self::ACKACT | 0x03,
        }
    }
}

/// Commands accepted by the slave command field.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlaveCommand {
    /// ACK and continue the transaction.
    Respond,
    /// Finish the transaction and wait for the next START.
    Complete,
    /// NACK the byte just received and finish the transaction.
    NackComplete,
}

impl SlaveCommand {
    const ACKACT: u8 = 0x04;

    #[must_use]
    pub fn bits(self) -> u8 {
        match self {
            SlaveCommand::Respond => 0x03,
            SlaveCommand::Complete => 0x02,
            SlaveCommand::NackComplete => Self::ACKACT | 0x02,
        }
    }
}

/// Address byte as put on the wire: the peer address shifted left, R/W in bit 0.
#[must_use]
pub fn address_byte(peer_address: u8, direction: Direction) -> u8 {
    let rw = match direction {
        Direction::Read => 0x01,
        Direction::Write => 0x00,
    };
    (peer_address << 1) | rw
}

/// Transaction descriptor handed to the master engine.
///
/// `B` is `&[u8]` for writes and `&mut [u8]` for reads.
#[derive(Debug)]
pub struct Package<B> {
    /// 7-bit address of the peer.
    pub peer_address: u8,
    /// Register/command bytes sent before the data phase.
    pub register_address: Vec<u8, MAX_REGISTER_ADDRESS_LEN>,
    pub buffer: B,
    /// Fail with [`Error::Busy`] instead of waiting for the bus lock.
    pub non_blocking: bool,
}

impl<B> Package<B> {
    pub fn new(peer_address: u8, buffer: B) -> Self {
        Self {
            peer_address,
            register_address: Vec::new(),
            buffer,
            non_blocking: false,
        }
    }

    /// Attach register/command bytes. More than three bytes is rejected.
    pub fn with_register_address(mut self, bytes: &[u8]) -> Result<Self, Error> {
        self.register_address =
            Vec::from_slice(bytes).map_err(|()| Error::InvalidArg)?;
        Ok(self)
    }

    #[must_use]
    pub fn non_blocking(mut self, enabled: bool) -> Self {
        self.non_blocking = enabled;
        self
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum TwiSpeed {
    Standard = 100_000,
    Fast = 400_000,
    FastPlus = 1_000_000,
}

impl TwiSpeed {
    #[must_use]
    pub fn rate(self) -> HertzU32 {
        HertzU32::from_raw(self as u32)
    }
}

/// Highest rate reachable without fast mode plus.
pub const FAST_MODE_MAX: HertzU32 = HertzU32::from_raw(400_000);
/// Highest rate the controller supports.
pub const FAST_MODE_PLUS_MAX: HertzU32 = HertzU32::from_raw(1_000_000);

/// Baud register value for `baud_rate` given the peripheral clock.
///
/// Uses `f_per / (2 * f_twi) - 5`; returns `None` when the result does not fit
/// the 8-bit baud register.
#[must_use]
pub fn baud_register(peripheral_clock: HertzU32, baud_rate: HertzU32) -> Option<u8> {
    let rate = baud_rate.raw();
    if rate == 0 {
        return None;
    }
    let divided = peripheral_clock.raw() / rate.checked_mul(2)?;
    let value = divided.checked_sub(5)?;
    u8::try_from(value).ok()
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TwiOptions {
    /// Bus clock rate.
    pub baud_rate: HertzU32,
    /// Explicit baud register value; computed from `peripheral_clock` if absent.
    pub baud_register_value: Option<u8>,
    /// Clock feeding the TWI module.
    pub peripheral_clock: Option<HertzU32>,
    /// Address this controller answers to when it is also a slave.
    pub own_address: u8,
    pub interrupt_level: InterruptLevel,
    /// Split master and slave onto separate pin pairs.
    pub bridge: bool,
}

impl TwiOptions {
    /// Validate the options and work out the baud register value.
    pub fn resolve_baud(&self) -> Result<u8, Error> {
        if self.own_address > MAX_ADDRESS {
            return Err(Error::InvalidArg);
        }
        if self.baud_rate.raw() == 0 || self.baud_rate > FAST_MODE_PLUS_MAX {
            return Err(Error::InvalidArg);
        }
        if let Some(value) = self.baud_register_value {
            return Ok(value);
        }
        let clock = self.peripheral_clock.ok_or(Error::InvalidArg)?;
        baud_register(clock, self.baud_rate).ok_or(Error::InvalidArg)
    }

    /// Shared control bits implied by these options.
    #[must_use]
    pub fn bus_control(&self) -> BusControl {
        let mut ctrl = BusControl::empty();
        if self.baud_rate > FAST_MODE_MAX {
            ctrl |= BusControl::FMPEN;
        }
        if self.bridge {
            ctrl |= BusControl::BRIDGEEN;
        }
        ctrl
    }
}

pub struct TwiOptionsBuilder {
    baud_rate: HertzU32,
    baud_register_value: Option<u8>,
    peripheral_clock: Option<HertzU32>,
    own_address: u8,
    interrupt_level: InterruptLevel,
    bridge: bool,
}

impl Default for TwiOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TwiOptionsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            baud_rate: TwiSpeed::Standard.rate(),
            baud_register_value: None,
            peripheral_clock: None,
            own_address: 0,
            interrupt_level: InterruptLevel::Low,
            bridge: false,
        }
    }
    #[must_use]
    pub fn speed(mut self, speed: TwiSpeed) -> Self {
        self.baud_rate = speed.rate();
        self
    }
    #[must_use]
    pub fn baud_rate(mut self, rate: HertzU32) -> Self {
        self.baud_rate = rate;
        self
    }
    #[must_use]
    pub fn baud_register_value(mut self, value: u8) -> Self {
        self.baud_register_value = Some(value);
        self
    }
    #[must_use]
    pub fn peripheral_clock(mut self, clock: HertzU32) -> Self {
        self.peripheral_clock = Some(clock);
        self
    }
    #[must_use]
    pub fn own_address(mut self, address: u8) -> Self {
        self.own_address = address;
        self
    }
    #[must_use]
    pub fn interrupt_level(mut self, level: InterruptLevel) -> Self {
        self.interrupt_level = level;
        self
    }
    #[must_use]
    pub fn bridge(mut self, enabled: bool) -> Self {
        self.bridge = enabled;
        self
    }
    #[must_use]
    pub fn build(self) -> TwiOptions {
        TwiOptions {
            baud_rate: self.baud_rate,
            baud_register_value: self.baud_register_value,
            peripheral_clock: self.peripheral_clock,
            own_address: self.own_address,
            interrupt_level: self.interrupt_level,
            bridge: self.bridge,
        }
    }
}
