// Licensed under the Apache-2.0 license

//! Master and slave engines talking to each other over the simulated wire.

use crate::common::NoOpLogger;
use crate::tests::wire::{MasterPort, SlavePort, Wire, WireEvent};
use crate::twi::common::{
    Error, InterruptLevel, MasterStatus, Package, SlaveResult, TransferStatus, TwiOptionsBuilder,
};
use crate::twi::master::TwiMaster;
use crate::twi::slave::{Received, TwiSlave};
use hex_literal::hex;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use std::vec::Vec;

const SLAVE_ADDRESS: u8 = 0x60;
const DEADLINE: Duration = Duration::from_secs(5);

fn init_master(wire: &Wire) -> TwiMaster<MasterPort<'_>> {
    let master = TwiMaster::without_logging(wire.master_port());
    let options = TwiOptionsBuilder::new().baud_register_value(5).build();
    assert_eq!(master.init(&options), Ok(5));
    master
}

fn settle<F: FnMut(&mut Received<'_>), const N: usize>(
    slave: &TwiSlave<SlavePort<'_>, F, NoOpLogger, N>,
) -> SlaveResult {
    let start = Instant::now();
    loop {
        if let Ok(result) = slave.poll_result() {
            return result;
        }
        assert!(start.elapsed() < DEADLINE, "slave never left Busy");
        thread::sleep(Duration::from_millis(1));
    }
}

fn wait_until(cond: impl Fn() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < DEADLINE, "condition never became true");
        thread::yield_now();
    }
}

#[test]
fn test_round_trip_write_to_slave() {
    let wire = Wire::new();
    let master = init_master(&wire);
    let slave: TwiSlave<_, _> =
        TwiSlave::new(wire.slave_port(), |_: &mut Received<'_>| {}, NoOpLogger);
    slave
        .init_module(SLAVE_ADDRESS, InterruptLevel::Low)
        .unwrap();

    let data = hex!("0F 1F 2F 3F 4F 5F 6F 7F");
    wire.with_interrupts(&master, Some(&slave), || {
        master
            .write(&Package::new(SLAVE_ADDRESS, &data[..]))
            .unwrap();
        assert_eq!(settle(&slave), SlaveResult::Ok);
    });

    let mut received = [0u8; 8];
    assert_eq!(slave.read_received(&mut received), 8);
    assert_eq!(received, data);
    assert_eq!(slave.bytes_received(), 8);
    assert!(!master.is_locked());
    assert_eq!(master.status(), TransferStatus::Complete);
}

#[test]
fn test_address_bytes_precede_data_and_one_stop() {
    let wire = Wire::new();
    let master = init_master(&wire);
    let slave: TwiSlave<_, _> =
        TwiSlave::new(wire.slave_port(), |_: &mut Received<'_>| {}, NoOpLogger);
    slave
        .init_module(SLAVE_ADDRESS, InterruptLevel::Low)
        .unwrap();

    let data = hex!("D0 D1 D2");
    wire.with_interrupts(&master, Some(&slave), || {
        let package = Package::new(SLAVE_ADDRESS, &data[..])
            .with_register_address(&hex!("A0 A1"))
            .unwrap();
        master.write(&package).unwrap();
        assert_eq!(settle(&slave), SlaveResult::Ok);
    });

    assert_eq!(
        wire.events(),
        vec![
            WireEvent::Start(0xC0),
            WireEvent::Write(0xA0),
            WireEvent::Write(0xA1),
            WireEvent::Write(0xD0),
            WireEvent::Write(0xD1),
            WireEvent::Write(0xD2),
            WireEvent::Stop,
        ]
    );
    let mut received = [0u8; 5];
    assert_eq!(slave.read_received(&mut received), 5);
    assert_eq!(received, hex!("A0 A1 D0 D1 D2"));
}

#[test]
fn test_read_restarts_once_after_register_bytes() {
    let wire = Wire::new();
    let master = init_master(&wire);
    let slave: TwiSlave<_, _> = TwiSlave::new(
        wire.slave_port(),
        |rx: &mut Received<'_>| {
            // Echo the register bytes back, inverted.
            if let Some(byte) = rx.latest() {
                let at = rx.data().len() - 1;
                rx.send_buffer()[at] = !byte;
            }
        },
        NoOpLogger,
    );
    slave
        .init_module(SLAVE_ADDRESS, InterruptLevel::Low)
        .unwrap();

    let mut buf = [0u8; 3];
    wire.with_interrupts(&master, Some(&slave), || {
        let mut package = Package::new(SLAVE_ADDRESS, &mut buf[..])
            .with_register_address(&hex!("01 02 03"))
            .unwrap();
        master.read(&mut package).unwrap();
        assert_eq!(settle(&slave), SlaveResult::Ok);
    });

    assert_eq!(buf, hex!("FE FD FC"));
    let events = wire.events();
    let restarts: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, WireEvent::Restart(_)))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(restarts, vec![4]);
    assert_eq!(events[3], WireEvent::Write(0x03));
    assert_eq!(events[4], WireEvent::Restart(0xC1));
    assert_eq!(
        events.iter().filter(|e| **e == WireEvent::Stop).count(),
        1
    );
    assert_eq!(slave.bytes_sent(), 3);
}

#[test]
fn test_plain_read_ends_on_master_nack() {
    let wire = Wire::new();
    let master = init_master(&wire);
    let slave: TwiSlave<_, _> =
        TwiSlave::new(wire.slave_port(), |_: &mut Received<'_>| {}, NoOpLogger);
    slave
        .init_module(SLAVE_ADDRESS, InterruptLevel::Low)
        .unwrap();
    slave.load_send_buffer(&hex!("10 20 30 40")).unwrap();

    let mut buf = [0u8; 2];
    wire.with_interrupts(&master, Some(&slave), || {
        master
            .read(&mut Package::new(SLAVE_ADDRESS, &mut buf[..]))
            .unwrap();
        assert_eq!(settle(&slave), SlaveResult::Ok);
    });

    assert_eq!(buf, hex!("10 20"));
    assert_eq!(slave.bytes_sent(), 2);
    assert_eq!(wire.events()[0], WireEvent::Start(0xC1));
}

#[test]
fn test_ping_completes_both_sides() {
    let wire = Wire::new();
    let master = init_master(&wire);
    let slave: TwiSlave<_, _> =
        TwiSlave::new(wire.slave_port(), |_: &mut Received<'_>| {}, NoOpLogger);
    slave
        .init_module(SLAVE_ADDRESS, InterruptLevel::Low)
        .unwrap();

    let empty: [u8; 0] = [];
    wire.with_interrupts(&master, Some(&slave), || {
        master
            .write(&Package::new(SLAVE_ADDRESS, &empty[..]))
            .unwrap();
        // Only the STOP can end a write that carries no data.
        assert_eq!(settle(&slave), SlaveResult::Ok);
    });

    assert_eq!(wire.events(), vec![WireEvent::Start(0xC0), WireEvent::Stop]);
    assert_eq!(master.status(), TransferStatus::Complete);
    assert!(!slave.is_busy());
    assert_eq!(slave.bytes_received(), 0);
}

#[test]
fn test_non_blocking_transfer_while_in_flight_is_busy() {
    let wire = Wire::new();
    let master = init_master(&wire);
    let slave: TwiSlave<_, _> =
        TwiSlave::new(wire.slave_port(), |_: &mut Received<'_>| {}, NoOpLogger);
    slave
        .init_module(SLAVE_ADDRESS, InterruptLevel::Low)
        .unwrap();

    let first = hex!("01 02 03 04");
    let other = hex!("EE");
    wire.with_interrupts(&master, Some(&slave), || {
        wire.pause(true);
        thread::scope(|s| {
            let holder = s.spawn(|| master.write(&Package::new(SLAVE_ADDRESS, &first[..])));
            wait_until(|| master.is_locked());
            assert_eq!(master.status(), TransferStatus::InProgress);

            let attempt = Package::new(SLAVE_ADDRESS, &other[..]).non_blocking(true);
            assert_eq!(master.write(&attempt), Err(Error::Busy));

            wire.pause(false);
            assert_eq!(holder.join().unwrap(), Ok(()));
        });
        assert_eq!(settle(&slave), SlaveResult::Ok);
    });

    // The refused transfer never reached the wire.
    let mut received = [0u8; 8];
    assert_eq!(slave.read_received(&mut received), 4);
    assert_eq!(&received[..4], &first);
    assert_eq!(
        wire.events()
            .iter()
            .filter(|e| matches!(e, WireEvent::Start(_)))
            .count(),
        1
    );
}

#[test]
fn test_blocked_transfer_succeeds_after_release() {
    let wire = Wire::new();
    let master = init_master(&wire);
    let log = Mutex::new(Vec::new());
    let slave: TwiSlave<_, _> = TwiSlave::new(
        wire.slave_port(),
        |rx: &mut Received<'_>| {
            if let Some(byte) = rx.latest() {
                log.lock().unwrap().push(byte);
            }
        },
        NoOpLogger,
    );
    slave
        .init_module(SLAVE_ADDRESS, InterruptLevel::Low)
        .unwrap();

    let first = hex!("11 12 13 14 15");
    let second = hex!("21 22 23");
    wire.with_interrupts(&master, Some(&slave), || {
        wire.pause(true);
        thread::scope(|s| {
            let holder = s.spawn(|| master.write(&Package::new(SLAVE_ADDRESS, &first[..])));
            wait_until(|| master.is_locked());

            let waiter = s.spawn(|| master.write(&Package::new(SLAVE_ADDRESS, &second[..])));
            thread::sleep(Duration::from_millis(20));
            assert!(!waiter.is_finished());

            wire.pause(false);
            assert_eq!(holder.join().unwrap(), Ok(()));
            assert_eq!(waiter.join().unwrap(), Ok(()));
        });
        assert_eq!(settle(&slave), SlaveResult::Ok);
    });

    assert_eq!(*log.lock().unwrap(), hex!("11 12 13 14 15 21 22 23").to_vec());
    let starts: Vec<WireEvent> = wire
        .events()
        .into_iter()
        .filter(|e| matches!(e, WireEvent::Start(_) | WireEvent::Stop))
        .collect();
    assert_eq!(
        starts,
        vec![
            WireEvent::Start(0xC0),
            WireEvent::Stop,
            WireEvent::Start(0xC0),
            WireEvent::Stop,
        ]
    );
}

#[test]
fn test_slave_overflow_nacks_extra_bytes() {
    let wire = Wire::new();
    let master = init_master(&wire);
    let slave: TwiSlave<_, _, NoOpLogger, 4> =
        TwiSlave::new(wire.slave_port(), |_: &mut Received<'_>| {}, NoOpLogger);
    slave
        .init_module(SLAVE_ADDRESS, InterruptLevel::Low)
        .unwrap();

    let data = hex!("01 02 03 04 05 06");
    let result = wire.with_interrupts(&master, Some(&slave), || {
        let result = master.write(&Package::new(SLAVE_ADDRESS, &data[..]));
        assert_eq!(settle(&slave), SlaveResult::BufferOverflow);
        result
    });

    assert_eq!(result, Err(Error::IoError));
    assert_eq!(slave.bytes_received(), 4);
    // The fifth byte was refused, the sixth never sent.
    assert!(!wire.events().contains(&WireEvent::Write(0x06)));
}

#[test]
fn test_slave_abort_refuses_next_transaction() {
    let wire = Wire::new();
    let master = init_master(&wire);
    let slave: TwiSlave<_, _> =
        TwiSlave::new(wire.slave_port(), |_: &mut Received<'_>| {}, NoOpLogger);
    slave
        .init_module(SLAVE_ADDRESS, InterruptLevel::Low)
        .unwrap();
    slave.request_abort();

    let result = wire.with_interrupts(&master, Some(&slave), || {
        master.write(&Package::new(SLAVE_ADDRESS, &hex!("99 98")[..]))
    });

    assert_eq!(result, Err(Error::IoError));
    assert_eq!(slave.result(), SlaveResult::Aborted);
    assert_eq!(slave.bytes_received(), 0);
    assert_eq!(slave.bytes_sent(), 0);
}

#[test]
fn test_slave_send_buffer_exhausted() {
    let wire = Wire::new();
    let master = init_master(&wire);
    let slave: TwiSlave<_, _, NoOpLogger, 2> =
        TwiSlave::new(wire.slave_port(), |_: &mut Received<'_>| {}, NoOpLogger);
    slave
        .init_module(SLAVE_ADDRESS, InterruptLevel::Low)
        .unwrap();
    slave.load_send_buffer(&hex!("5A A5")).unwrap();

    let mut buf = [0u8; 3];
    wire.with_interrupts(&master, Some(&slave), || {
        master
            .read(&mut Package::new(SLAVE_ADDRESS, &mut buf[..]))
            .unwrap();
        assert_eq!(settle(&slave), SlaveResult::BufferOverflow);
    });

    // Nobody drives the bus for the third byte.
    assert_eq!(buf, hex!("5A A5 FF"));
}

#[test]
fn test_missing_slave_is_io_error() {
    let wire = Wire::new();
    let master = init_master(&wire);
    let slave: TwiSlave<_, _> =
        TwiSlave::new(wire.slave_port(), |_: &mut Received<'_>| {}, NoOpLogger);
    slave
        .init_module(SLAVE_ADDRESS, InterruptLevel::Low)
        .unwrap();

    let result = wire.with_interrupts(&master, Some(&slave), || {
        master.write(&Package::new(0x33, &[1u8][..]))
    });

    assert_eq!(result, Err(Error::IoError));
    assert_eq!(wire.events(), vec![WireEvent::Start(0x66), WireEvent::Stop]);
    assert_eq!(slave.result(), SlaveResult::Unknown);
}

#[test]
fn test_arbitration_loss_mid_transfer() {
    let wire = Wire::new();
    let master = init_master(&wire);
    let slave: TwiSlave<_, _> =
        TwiSlave::new(wire.slave_port(), |_: &mut Received<'_>| {}, NoOpLogger);
    slave
        .init_module(SLAVE_ADDRESS, InterruptLevel::Low)
        .unwrap();

    let data = hex!("01 02");
    let result = wire.with_interrupts(&master, Some(&slave), || {
        wire.pause(true);
        thread::scope(|s| {
            let holder = s.spawn(|| master.write(&Package::new(SLAVE_ADDRESS, &data[..])));
            wait_until(|| !wire.events().is_empty());
            wire.inject_master(MasterStatus::ARBLOST);
            wire.pause(false);
            holder.join().unwrap()
        })
    });

    assert_eq!(result, Err(Error::Busy));
    assert!(!master.is_locked());
    assert_eq!(master.status(), TransferStatus::Failed(Error::Busy));
    assert_eq!(wire.events().last(), Some(&WireEvent::Stop));
}
