mod common;

use common::{SimSerial, with_interrupt_line};
use node_core::scheduler::{Event, EventScheduler};
use node_core::serial::{SerialCondition, SerialEngine, SerialFault, SerialPhase};
use node_core::sleep::{EnergyArbiter, EnergyMode};

fn drain(engine: &SerialEngine<'_, SimSerial>) {
    while engine.with_port(|port| port.has_pending()) {
        engine.on_interrupt().expect("serial interrupt should not fault");
    }
}

#[test]
fn two_byte_transmit_consumes_two_buffer_empty_and_one_complete() {
    let arbiter = EnergyArbiter::new();
    let scheduler = EventScheduler::new();
    let engine = SerialEngine::new(SimSerial::default(), None, &arbiter, &scheduler);
    engine.open();

    engine.transmit("AT").expect("transmit should start");
    assert_eq!(arbiter.votes(EnergyMode::Em3), 1);
    drain(&engine);

    engine.with_port(|port| {
        assert_eq!(port.wire.as_slice(), b"AT");
        assert_eq!(port.buffer_empty_served, 2);
        assert_eq!(port.transmit_complete_served, 1);
    });
    assert!(engine.is_available());
    assert_eq!(engine.phase(), SerialPhase::Idle);
    assert_eq!(arbiter.votes(EnergyMode::Em3), 0);
    assert!(scheduler.pending().is_empty());
}

#[test]
fn completion_event_is_posted_when_configured() {
    let arbiter = EnergyArbiter::new();
    let scheduler = EventScheduler::new();
    let engine = SerialEngine::new(
        SimSerial::default(),
        Some(Event::SerialTxComplete),
        &arbiter,
        &scheduler,
    );
    engine.open();

    engine.transmit("Hello World").unwrap();
    drain(&engine);

    assert_eq!(scheduler.pending().bits(), Event::SerialTxComplete.bit());
    engine.with_port(|port| assert_eq!(port.wire.as_slice(), b"Hello World"));
}

#[test]
fn back_to_back_transmissions_do_not_interleave() {
    let arbiter = EnergyArbiter::new();
    let scheduler = EventScheduler::new();
    let engine = SerialEngine::new(SimSerial::default(), None, &arbiter, &scheduler);
    engine.open();

    with_interrupt_line(
        || engine.on_interrupt().expect("serial interrupt should not fault"),
        || {
            engine.transmit("first,").unwrap();
            engine.transmit("second").unwrap();
            engine.wait_until_available();
        },
    );

    engine.with_port(|port| assert_eq!(port.wire.as_slice(), b"first,second"));
    assert_eq!(arbiter.votes(EnergyMode::Em3), 0);
}

#[test]
fn stray_buffer_empty_in_stop_faults_once_and_holds_state() {
    let arbiter = EnergyArbiter::new();
    let scheduler = EventScheduler::new();
    let engine = SerialEngine::new(SimSerial::default(), None, &arbiter, &scheduler);
    engine.open();
    engine.transmit("A").unwrap();
    engine.handle(SerialCondition::BufferEmpty).unwrap();
    assert_eq!(engine.phase(), SerialPhase::Stop);

    assert_eq!(
        engine.handle(SerialCondition::BufferEmpty),
        Err(SerialFault::ProtocolViolation {
            phase: SerialPhase::Stop,
            condition: SerialCondition::BufferEmpty,
        })
    );
    assert_eq!(engine.phase(), SerialPhase::Stop);
    assert!(!engine.is_available());
    engine.with_port(|port| assert_eq!(port.wire.as_slice(), b"A"));

    engine.handle(SerialCondition::TransmitComplete).unwrap();
    assert!(engine.is_available());
}

#[test]
fn idle_channel_rejects_interrupts() {
    let arbiter = EnergyArbiter::new();
    let scheduler = EventScheduler::new();
    let engine = SerialEngine::new(SimSerial::default(), None, &arbiter, &scheduler);
    engine.open();

    for condition in [SerialCondition::BufferEmpty, SerialCondition::TransmitComplete] {
        assert!(matches!(
            engine.handle(condition),
            Err(SerialFault::ProtocolViolation {
                phase: SerialPhase::Idle,
                ..
            })
        ));
    }
    assert!(engine.is_available());
}
