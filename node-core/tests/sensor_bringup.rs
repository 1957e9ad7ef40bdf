mod common;

use common::{SimBus, WireOp, with_interrupt_line};
use node_core::bus::BusEngine;
use node_core::scheduler::{Event, EventScheduler};
use node_core::sensor::{
    CHAN_LIST_CHANNEL0, CMD_FORCE, CMD_PARAM_SET, COMMAND, HOSTOUT0, INPUT0, PARAM_CHAN_LIST,
    RESPONSE0, SensorError, Si1133,
};
use node_core::sleep::EnergyArbiter;

#[test]
fn configure_selects_white_channel_and_checks_counter() {
    let arbiter = EnergyArbiter::new();
    let scheduler = EventScheduler::new();
    let mut bus = SimBus::new().with_command_counter(COMMAND, RESPONSE0);
    bus.registers[usize::from(RESPONSE0)] = 0x0E;
    let engine = BusEngine::new(bus, &arbiter, &scheduler);
    engine.open();
    let sensor = Si1133::new(&engine);

    let configured = with_interrupt_line(
        || engine.on_interrupt().expect("bus interrupt should not fault"),
        || sensor.configure(),
    );

    assert_eq!(configured, Ok(()));
    engine.with_controller(|bus| {
        assert_eq!(bus.registers[usize::from(INPUT0)], CHAN_LIST_CHANNEL0);
        assert_eq!(
            bus.registers[usize::from(COMMAND)],
            CMD_PARAM_SET | PARAM_CHAN_LIST
        );
        assert_eq!(bus.registers[usize::from(RESPONSE0)], 2);
    });
    assert!(scheduler.pending().is_empty());
}

#[test]
fn configure_reports_stalled_command_counter() {
    let arbiter = EnergyArbiter::new();
    let scheduler = EventScheduler::new();
    let engine = BusEngine::new(SimBus::new(), &arbiter, &scheduler);
    engine.open();
    let sensor = Si1133::new(&engine);

    let configured = with_interrupt_line(
        || engine.on_interrupt().expect("bus interrupt should not fault"),
        || sensor.configure(),
    );

    assert_eq!(
        configured,
        Err(SensorError::CommandCounter {
            expected: 1,
            actual: 0,
        })
    );
    assert!(engine.is_available());
}

#[test]
fn measurement_cycle_forces_then_reads_two_bytes() {
    let arbiter = EnergyArbiter::new();
    let scheduler = EventScheduler::new();
    let mut bus = SimBus::new();
    bus.registers[usize::from(HOSTOUT0)] = 0x01;
    bus.registers[usize::from(HOSTOUT0) + 1] = 0x2C;
    let engine = BusEngine::new(bus, &arbiter, &scheduler);
    engine.open();
    engine.with_controller(|bus| bus.wire.clear());
    let sensor = Si1133::new(&engine);

    with_interrupt_line(
        || engine.on_interrupt().expect("bus interrupt should not fault"),
        || {
            sensor.force_sense().unwrap();
            sensor
                .request_result(Some(Event::SensorReadComplete))
                .unwrap();
            engine.wait_until_available();
        },
    );

    assert_eq!(sensor.result(), 300);
    assert!(scheduler.pending().contains(Event::SensorReadComplete));
    engine.with_controller(|bus| {
        let written: Vec<u8> = bus.wire[..5]
            .iter()
            .filter_map(|op| match op {
                WireOp::Byte(byte) => Some(*byte),
                _ => None,
            })
            .collect();
        assert_eq!(written, [0xAA, COMMAND, CMD_FORCE]);
    });
}
