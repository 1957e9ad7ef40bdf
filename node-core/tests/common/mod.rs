#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use heapless::Vec as HeaplessVec;
use node_core::bus::{BusCommand, BusCondition, BusConditions, BusController};
use node_core::serial::{SerialCondition, SerialConditions, SerialPort};
use node_core::sleep::{EnergyMode, SleepController};

pub const SENSOR_ADDRESS: u8 = 0x55;

/// What the bus controller put on the wire, in order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WireOp {
    Start,
    Stop,
    Byte(u8),
    Ack,
    Nack,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum DevicePhase {
    Released,
    Address,
    Register,
    Writing,
    Reading,
}

/// Bus controller with one register-addressed device attached.
///
/// The device answers reads from `registers` starting at the addressed
/// register and records writes into the same map. Every byte the controller
/// sends is acknowledged; a STOP replaces whatever condition is still queued.
pub struct SimBus {
    pub wire: HeaplessVec<WireOp, 256>,
    pub registers: [u8; 256],
    pub counter_register: Option<u8>,
    pub command_register: Option<u8>,
    pub busy: bool,
    phase: DevicePhase,
    pointer: u8,
    rx: u8,
    pending: BusConditions,
    mask: u32,
    stop_seen: bool,
}

impl SimBus {
    pub fn new() -> Self {
        Self {
            wire: HeaplessVec::new(),
            registers: [0; 256],
            counter_register: None,
            command_register: None,
            busy: false,
            phase: DevicePhase::Released,
            pointer: 0,
            rx: 0,
            pending: BusConditions::NONE,
            mask: 0x160,
            stop_seen: false,
        }
    }

    /// Emulates a sensor-style command register that bumps a counter held in
    /// `counter` whenever a parameter command lands in `command`.
    pub fn with_command_counter(mut self, command: u8, counter: u8) -> Self {
        self.command_register = Some(command);
        self.counter_register = Some(counter);
        self
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.wire.iter().filter_map(|op| match op {
            WireOp::Byte(byte) => Some(*byte),
            _ => None,
        })
    }

    fn record(&mut self, op: WireOp) {
        self.wire.push(op).expect("wire log full");
    }

    fn raise(&mut self, condition: BusCondition) {
        self.pending = self.pending.with(condition);
    }

    fn load_rx(&mut self) {
        self.rx = self.registers[usize::from(self.pointer)];
        self.pointer = self.pointer.wrapping_add(1);
        self.raise(BusCondition::DataReceived);
    }

    fn store(&mut self, byte: u8) {
        let register = self.pointer;
        self.registers[usize::from(register)] = byte;
        self.pointer = self.pointer.wrapping_add(1);

        if Some(register) == self.command_register {
            if let Some(counter) = self.counter_register {
                let slot = &mut self.registers[usize::from(counter)];
                *slot = if byte == 0 { 0 } else { (*slot + 1) & 0x0F };
            }
        }
    }
}

impl BusController for SimBus {
    fn command(&mut self, command: BusCommand) {
        if command.contains(BusCommand::START) {
            self.record(WireOp::Start);
            self.phase = DevicePhase::Address;
        }
        if command.contains(BusCommand::ACK) {
            self.record(WireOp::Ack);
            self.load_rx();
        }
        if command.contains(BusCommand::NACK) {
            self.record(WireOp::Nack);
        }
        if command.contains(BusCommand::STOP) {
            self.record(WireOp::Stop);
            self.phase = DevicePhase::Released;
            self.pending = BusConditions::from(BusCondition::Stop);
            self.stop_seen = true;
        }
    }

    fn transmit(&mut self, byte: u8) {
        self.record(WireOp::Byte(byte));
        match self.phase {
            DevicePhase::Address if byte >> 1 == SENSOR_ADDRESS => {
                self.raise(BusCondition::Ack);
                if byte & 1 == 1 {
                    self.phase = DevicePhase::Reading;
                    self.load_rx();
                } else {
                    self.phase = DevicePhase::Register;
                }
            }
            DevicePhase::Register => {
                self.pointer = byte;
                self.phase = DevicePhase::Writing;
                self.raise(BusCondition::Ack);
            }
            DevicePhase::Writing => {
                self.store(byte);
                self.raise(BusCondition::Ack);
            }
            DevicePhase::Address | DevicePhase::Released | DevicePhase::Reading => {}
        }
    }

    fn receive(&mut self) -> u8 {
        self.rx
    }

    fn is_idle(&self) -> bool {
        !self.busy
    }

    fn interrupt_mask(&self) -> u32 {
        self.mask
    }

    fn set_interrupt_mask(&mut self, mask: u32) {
        self.mask = mask;
    }

    fn clear_flags(&mut self) {
        self.pending = BusConditions::NONE;
    }

    fn stop_detected(&self) -> bool {
        self.stop_seen
    }

    fn take_pending(&mut self) -> BusConditions {
        if self.mask == 0 {
            return BusConditions::NONE;
        }
        core::mem::take(&mut self.pending)
    }
}

/// Serial channel whose frames complete as soon as they are written.
#[derive(Default)]
pub struct SimSerial {
    pub wire: HeaplessVec<u8, 128>,
    pub buffer_empty_served: usize,
    pub transmit_complete_served: usize,
    enabled: SerialConditions,
    frame_done: bool,
}

impl SimSerial {
    pub fn has_pending(&self) -> bool {
        !self.pending().is_empty()
    }

    fn pending(&self) -> SerialConditions {
        let mut pending = SerialConditions::NONE;
        if self.enabled.contains(SerialCondition::BufferEmpty) {
            pending = pending.with(SerialCondition::BufferEmpty);
        }
        if self.frame_done && self.enabled.contains(SerialCondition::TransmitComplete) {
            pending = pending.with(SerialCondition::TransmitComplete);
        }
        pending
    }
}

impl SerialPort for SimSerial {
    fn enable_interrupt(&mut self, condition: SerialCondition) {
        self.enabled = self.enabled.with(condition);
    }

    fn disable_interrupt(&mut self, condition: SerialCondition) {
        let mut kept = SerialConditions::NONE;
        for other in self.enabled.iter().filter(|other| *other != condition) {
            kept = kept.with(other);
        }
        self.enabled = kept;
    }

    fn write(&mut self, byte: u8) {
        self.wire.push(byte).expect("serial wire full");
        self.frame_done = true;
    }

    fn take_pending(&mut self) -> SerialConditions {
        let pending = self.pending();
        if pending.contains(SerialCondition::BufferEmpty) {
            self.buffer_empty_served += 1;
        }
        if pending.contains(SerialCondition::TransmitComplete) {
            self.transmit_complete_served += 1;
            self.frame_done = false;
        }
        pending
    }
}

/// Sleep hook that only records what it was asked to do.
#[derive(Default)]
pub struct RecordingSleeper {
    pub entered: HeaplessVec<EnergyMode, 64>,
}

impl SleepController for RecordingSleeper {
    fn enter(&mut self, mode: EnergyMode) {
        let _ = self.entered.push(mode);
    }
}

/// Runs `body` while another thread stands in for the interrupt line,
/// calling `service` until `body` returns.
pub fn with_interrupt_line<R>(service: impl Fn() + Sync, body: impl FnOnce() -> R) -> R {
    let done = AtomicBool::new(false);
    thread::scope(|scope| {
        scope.spawn(|| {
            while !done.load(Ordering::Acquire) {
                service();
                thread::yield_now();
            }
        });
        let result = body();
        done.store(true, Ordering::Release);
        result
    })
}
