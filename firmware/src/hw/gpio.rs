//! GPIO pin modes and the status LED.

use node_core::app::Indicator;

use super::Block;

const GPIO: Block = Block::at(0x4000_A000);
const PORT_STRIDE: usize = 0x30;

const MODEL: usize = 0x04;
const MODEH: usize = 0x08;
const DOUT: usize = 0x0C;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(usize)]
pub enum Port {
    C = 2,
    D = 3,
    F = 5,
    I = 8,
    J = 9,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Mode {
    Input = 1,
    PushPull = 4,
    WiredAnd = 8,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Pin {
    port: Port,
    pin: u8,
}

impl Pin {
    pub const fn new(port: Port, pin: u8) -> Self {
        Self { port, pin }
    }

    fn offset(self, register: usize) -> usize {
        self.port as usize * PORT_STRIDE + register
    }

    pub fn configure(self, mode: Mode, high: bool) {
        self.set(high);
        let (register, shift) = if self.pin < 8 {
            (MODEL, u32::from(self.pin) * 4)
        } else {
            (MODEH, u32::from(self.pin - 8) * 4)
        };
        GPIO.modify(self.offset(register), |value| {
            (value & !(0xF << shift)) | ((mode as u32) << shift)
        });
    }

    pub fn set(self, high: bool) {
        let bit = 1 << self.pin;
        if high {
            GPIO.set_bits(self.offset(DOUT), bit);
        } else {
            GPIO.clear_bits(self.offset(DOUT), bit);
        }
    }
}

/// Sensor power, both buses and serial pins.
pub fn open() {
    Pin::new(Port::F, 9).configure(Mode::PushPull, true);
    Pin::new(Port::C, 5).configure(Mode::WiredAnd, true);
    Pin::new(Port::C, 4).configure(Mode::WiredAnd, true);
    Pin::new(Port::C, 11).configure(Mode::WiredAnd, true);
    Pin::new(Port::C, 10).configure(Mode::WiredAnd, true);
    Pin::new(Port::F, 3).configure(Mode::PushPull, true);
    Pin::new(Port::F, 4).configure(Mode::Input, true);
}

/// Blue channel of RGB LED 1.
pub struct StatusLed {
    enable: Pin,
    select: Pin,
    blue: Pin,
}

impl StatusLed {
    pub const fn new() -> Self {
        Self {
            enable: Pin::new(Port::J, 14),
            select: Pin::new(Port::I, 1),
            blue: Pin::new(Port::D, 13),
        }
    }

    pub fn open(&self) {
        for pin in [self.enable, self.select, self.blue] {
            pin.configure(Mode::PushPull, false);
        }
    }
}

impl Default for StatusLed {
    fn default() -> Self {
        Self::new()
    }
}

impl Indicator for StatusLed {
    fn set(&mut self, on: bool) {
        self.enable.set(on);
        self.select.set(on);
        self.blue.set(on);
    }
}
