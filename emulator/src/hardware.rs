//! Simulated peripherals for the host emulator.
//!
//! Each model implements one of the core's hardware traits and reacts the way
//! the real part does closely enough for the protocol engines: the sensor
//! acknowledges every byte and answers register reads, the serial port
//! completes frames instantly, and the timer raises whatever condition the
//! session injects.

use std::collections::VecDeque;

use node_core::app::Indicator;

use node_core::bus::{BusCommand, BusCondition, BusConditions, BusController};
use node_core::config::SI1133_ADDRESS;
use node_core::sensor::{
    CMD_FORCE, CMD_PARAM_SET, CMD_RESET_CMD_CTR, COMMAND, HOSTOUT0, INPUT0, PART_ID,
    PART_ID_SI1133, RESPONSE0, RESPONSE0_CMD_CTR_MASK,
};
use node_core::serial::{SerialCondition, SerialConditions, SerialPort};
use node_core::sleep::{EnergyMode, SleepController};
use node_core::timer::{PeriodicTimer, PwmSettings, TimerCondition, TimerConditions};

const PARAM_TABLE_SIZE: usize = 0x40;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Phase {
    Released,
    Address,
    Register,
    Writing,
    Reading,
}

/// Si1133 model behind an I2C controller.
pub struct SensorBus {
    registers: [u8; 0x30],
    params: [u8; PARAM_TABLE_SIZE],
    light: u16,
    phase: Phase,
    pointer: u8,
    rx: u8,
    pending: BusConditions,
    mask: u32,
    stop_seen: bool,
    transactions: u32,
    bytes_on_wire: u32,
}

impl SensorBus {
    pub fn new(light: u16) -> Self {
        let mut registers = [0; 0x30];
        registers[usize::from(PART_ID)] = PART_ID_SI1133;
        Self {
            registers,
            params: [0; PARAM_TABLE_SIZE],
            light,
            phase: Phase::Released,
            pointer: 0,
            rx: 0,
            pending: BusConditions::NONE,
            mask: 0x160,
            stop_seen: false,
            transactions: 0,
            bytes_on_wire: 0,
        }
    }

    /// Light level reported by the next forced conversion.
    pub fn set_light(&mut self, light: u16) {
        self.light = light;
    }

    pub fn light(&self) -> u16 {
        self.light
    }

    pub fn has_pending(&self) -> bool {
        self.mask != 0 && !self.pending.is_empty()
    }

    /// Completed STOP conditions and bytes clocked since power-up.
    pub fn traffic(&self) -> (u32, u32) {
        (self.transactions, self.bytes_on_wire)
    }

    pub fn param(&self, address: u8) -> u8 {
        self.params[usize::from(address) % PARAM_TABLE_SIZE]
    }

    fn register(&self, address: u8) -> u8 {
        self.registers
            .get(usize::from(address))
            .copied()
            .unwrap_or(0)
    }

    fn bump_counter(&mut self) {
        let slot = &mut self.registers[usize::from(RESPONSE0)];
        *slot = (*slot & !RESPONSE0_CMD_CTR_MASK)
            | (slot.wrapping_add(1) & RESPONSE0_CMD_CTR_MASK);
    }

    fn run_command(&mut self, command: u8) {
        match command {
            CMD_RESET_CMD_CTR => self.registers[usize::from(RESPONSE0)] = 0,
            CMD_FORCE => {
                let [high, low] = self.light.to_be_bytes();
                self.registers[usize::from(HOSTOUT0)] = high;
                self.registers[usize::from(HOSTOUT0) + 1] = low;
                self.bump_counter();
            }
            command if command & CMD_PARAM_SET != 0 => {
                let address = command & !CMD_PARAM_SET;
                self.params[usize::from(address) % PARAM_TABLE_SIZE] =
                    self.registers[usize::from(INPUT0)];
                self.bump_counter();
            }
            _ => self.bump_counter(),
        }
    }

    fn store(&mut self, byte: u8) {
        let address = self.pointer;
        if let Some(slot) = self.registers.get_mut(usize::from(address)) {
            *slot = byte;
        }
        self.pointer = self.pointer.wrapping_add(1);
        if address == COMMAND {
            self.run_command(byte);
        }
    }

    fn load_rx(&mut self) {
        self.rx = self.register(self.pointer);
        self.pointer = self.pointer.wrapping_add(1);
        self.pending = self.pending.with(BusCondition::DataReceived);
    }
}

impl BusController for SensorBus {
    fn command(&mut self, command: BusCommand) {
        if command.contains(BusCommand::START) {
            self.phase = Phase::Address;
        }
        if command.contains(BusCommand::ACK) {
            self.load_rx();
        }
        if command.contains(BusCommand::STOP) {
            self.phase = Phase::Released;
            self.pending = BusConditions::from(BusCondition::Stop);
            self.stop_seen = true;
            self.transactions += 1;
        }
    }

    fn transmit(&mut self, byte: u8) {
        self.bytes_on_wire += 1;
        match self.phase {
            Phase::Address if byte >> 1 == SI1133_ADDRESS => {
                self.pending = self.pending.with(BusCondition::Ack);
                if byte & 1 == 1 {
                    self.phase = Phase::Reading;
                    self.load_rx();
                } else {
                    self.phase = Phase::Register;
                }
            }
            Phase::Register => {
                self.pointer = byte;
                self.phase = Phase::Writing;
                self.pending = self.pending.with(BusCondition::Ack);
            }
            Phase::Writing => {
                self.store(byte);
                self.pending = self.pending.with(BusCondition::Ack);
            }
            Phase::Address | Phase::Released | Phase::Reading => {}
        }
    }

    fn receive(&mut self) -> u8 {
        self.rx
    }

    fn is_idle(&self) -> bool {
        self.phase == Phase::Released
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
        std::mem::take(&mut self.pending)
    }
}

/// Serial link that hands each finished transmission to the session.
#[derive(Default)]
pub struct CapturedSerial {
    current: Vec<u8>,
    finished: VecDeque<String>,
    enabled: SerialConditions,
    frame_done: bool,
}

impl CapturedSerial {
    pub fn has_pending(&self) -> bool {
        !self.pending().is_empty()
    }

    /// Transmissions completed since the last call.
    pub fn drain_finished(&mut self) -> Vec<String> {
        self.finished.drain(..).collect()
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

impl SerialPort for CapturedSerial {
    fn enable_interrupt(&mut self, condition: SerialCondition) {
        self.enabled = self.enabled.with(condition);
    }

    fn disable_interrupt(&mut self, condition: SerialCondition) {
        let mut kept = SerialConditions::NONE;
        for other in self.enabled.iter().filter(|other| *other != condition) {
            kept = kept.with(other);
        }
        self.enabled = kept;

        if condition == SerialCondition::TransmitComplete && self.frame_done {
            let text = String::from_utf8_lossy(&self.current).into_owned();
            self.finished.push_back(text);
            self.current.clear();
            self.frame_done = false;
        }
    }

    fn write(&mut self, byte: u8) {
        self.current.push(byte);
        self.frame_done = true;
    }

    fn take_pending(&mut self) -> SerialConditions {
        self.pending()
    }
}

/// LETIMER stand-in; conditions fire only when the session injects them.
#[derive(Default)]
pub struct SimTimer {
    running: bool,
    settings: Option<PwmSettings>,
    enabled: TimerConditions,
    flags: TimerConditions,
}

impl SimTimer {
    /// Latches `condition` if the counter is running.
    pub fn elapse(&mut self, condition: TimerCondition) -> bool {
        if self.running {
            self.flags = self.flags.with(condition);
        }
        self.running
    }

    pub fn settings(&self) -> Option<PwmSettings> {
        self.settings
    }
}

impl PeriodicTimer for SimTimer {
    fn is_running(&self) -> bool {
        self.running
    }

    fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    fn program(&mut self, settings: &PwmSettings) {
        self.settings = Some(*settings);
    }

    fn set_interrupts(&mut self, enabled: TimerConditions) {
        self.enabled = enabled;
        self.flags = TimerConditions::NONE;
    }

    fn take_pending(&mut self) -> TimerConditions {
        let mut pending = TimerConditions::NONE;
        for condition in self.flags.iter().filter(|c| self.enabled.contains(*c)) {
            pending = pending.with(condition);
        }
        self.flags = TimerConditions::NONE;
        pending
    }
}

/// Status LED; the session reports changes between commands.
#[derive(Default)]
pub struct ConsoleLed {
    on: bool,
}

impl ConsoleLed {
    pub fn is_on(&self) -> bool {
        self.on
    }
}

impl Indicator for ConsoleLed {
    fn set(&mut self, on: bool) {
        self.on = on;
    }
}

/// Sleep hook that records the requested mode; the host never halts.
#[derive(Default)]
pub struct HostSleeper {
    last: Option<EnergyMode>,
    entries: u64,
}

impl HostSleeper {
    /// Mode requested by the most recent sleep.
    pub fn last(&self) -> Option<EnergyMode> {
        self.last
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }
}

impl SleepController for HostSleeper {
    fn enter(&mut self, mode: EnergyMode) {
        self.last = Some(mode);
        self.entries += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_set_latches_input_and_counts() {
        let mut bus = SensorBus::new(0);
        bus.phase = Phase::Writing;
        bus.pointer = INPUT0;
        bus.store(0x0B);
        bus.pointer = COMMAND;
        bus.store(CMD_PARAM_SET | 0x02);

        assert_eq!(bus.param(0x02), 0x0B);
        assert_eq!(bus.register(RESPONSE0), 1);
    }

    #[test]
    fn force_latches_light_into_hostout() {
        let mut bus = SensorBus::new(0x1234);
        bus.pointer = COMMAND;
        bus.store(CMD_FORCE);

        assert_eq!(bus.register(HOSTOUT0), 0x12);
        assert_eq!(bus.register(HOSTOUT0 + 1), 0x34);
    }

    #[test]
    fn counter_wraps_within_low_nibble() {
        let mut bus = SensorBus::new(0);
        bus.registers[usize::from(RESPONSE0)] = 0x0F;
        bus.bump_counter();
        assert_eq!(bus.register(RESPONSE0), 0x00);
    }

    #[test]
    fn serial_capture_splits_transmissions() {
        let mut port = CapturedSerial::default();
        for byte in b"AT" {
            port.write(*byte);
        }
        port.enable_interrupt(SerialCondition::TransmitComplete);
        port.disable_interrupt(SerialCondition::TransmitComplete);

        assert_eq!(port.drain_finished(), vec!["AT".to_string()]);
        assert!(port.drain_finished().is_empty());
    }
}
