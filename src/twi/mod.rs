// Licensed under the Apache-2.0 license

//! Interrupt-driven TWI (I2C) driver module.
//!
//! The master and slave engines are hardware independent: they drive the bus
//! through the register traits in [`traits`] and are advanced one bus event at a
//! time from the platform's interrupt vectors.

pub mod bus_lock;
pub mod common;
pub mod master;
#[cfg(feature = "twi_slave")]
pub mod slave;
pub mod system_setup;
pub mod traits;
pub mod twi_controller;
