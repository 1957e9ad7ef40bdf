//! Register-level bindings for the EFM32PG12 peripherals the node uses.
//!
//! Each driver owns a [`Block`] (peripheral base address) and touches its
//! registers through volatile accesses. Drivers are only called from inside
//! the core's critical sections or before interrupts are enabled, so
//! read-modify-write sequences are not interleaved.

pub mod gpio;
pub mod i2c;
pub mod letimer;
pub mod leuart;
pub mod sleep;

use core::ptr;

use cortex_m::interrupt::InterruptNumber;

/// Peripheral register block at a fixed base address.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Block {
    base: usize,
}

impl Block {
    pub const fn at(base: usize) -> Self {
        Self { base }
    }

    pub fn read(self, offset: usize) -> u32 {
        // SAFETY: `base + offset` is a documented register of this block.
        unsafe { ptr::read_volatile((self.base + offset) as *const u32) }
    }

    pub fn write(self, offset: usize, value: u32) {
        // SAFETY: as for `read`; writes have no memory-safety side effects.
        unsafe { ptr::write_volatile((self.base + offset) as *mut u32, value) }
    }

    pub fn modify(self, offset: usize, f: impl FnOnce(u32) -> u32) {
        self.write(offset, f(self.read(offset)));
    }

    pub fn set_bits(self, offset: usize, bits: u32) {
        self.modify(offset, |value| value | bits);
    }

    pub fn clear_bits(self, offset: usize, bits: u32) {
        self.modify(offset, |value| value & !bits);
    }

    /// Spins while any `bits` of the register are set.
    pub fn wait_clear(self, offset: usize, bits: u32) {
        while self.read(offset) & bits != 0 {
            core::hint::spin_loop();
        }
    }
}

/// Device interrupt lines the firmware services.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum Irq {
    I2c0 = 16,
    Leuart0 = 21,
    Letimer0 = 26,
    I2c1 = 41,
}

impl Irq {
    pub const fn from_number(number: i16) -> Option<Self> {
        match number {
            16 => Some(Irq::I2c0),
            21 => Some(Irq::Leuart0),
            26 => Some(Irq::Letimer0),
            41 => Some(Irq::I2c1),
            _ => None,
        }
    }

    /// Clears any stale pending state and unmasks the line in the NVIC.
    pub fn enable(self) {
        cortex_m::peripheral::NVIC::unpend(self);
        // SAFETY: every handler behind these lines only touches state guarded
        // by critical sections.
        unsafe { cortex_m::peripheral::NVIC::unmask(self) };
    }
}

// SAFETY: discriminants are valid EFM32PG12 IRQ numbers.
unsafe impl InterruptNumber for Irq {
    fn number(self) -> u16 {
        self as u16
    }
}

/// Clock management unit.
pub mod cmu {
    use super::Block;

    const CMU: Block = Block::at(0x400E_4000);

    const OSCENCMD: usize = 0x060;
    const STATUS: usize = 0x090;
    const HFBUSCLKEN0: usize = 0x0B0;
    const HFPERCLKEN0: usize = 0x0C0;
    const LFACLKSEL: usize = 0x0E0;
    const LFBCLKSEL: usize = 0x0E4;
    const LFACLKEN0: usize = 0x0F0;
    const LFBCLKEN0: usize = 0x0F8;

    const OSCENCMD_LFRCODIS: u32 = 1 << 7;
    const OSCENCMD_LFXOEN: u32 = 1 << 8;
    const OSCENCMD_LFXODIS: u32 = 1 << 9;
    const STATUS_LFXORDY: u32 = 1 << 9;
    const HFBUSCLKEN0_LE: u32 = 1 << 0;
    const HFBUSCLKEN0_GPIO: u32 = 1 << 3;
    pub const HFPERCLKEN0_I2C0: u32 = 1 << 10;
    pub const HFPERCLKEN0_I2C1: u32 = 1 << 11;
    const LFCLKSEL_LFXO: u32 = 2;
    const LFCLKSEL_ULFRCO: u32 = 4;
    const LFACLKEN0_LETIMER0: u32 = 1 << 0;
    const LFBCLKEN0_LEUART0: u32 = 1 << 0;

    /// ULFRCO (1 kHz) feeds the timer branch and LFXO the serial branch.
    pub fn open() {
        CMU.write(OSCENCMD, OSCENCMD_LFRCODIS);
        resume_lfxo();
        CMU.set_bits(HFBUSCLKEN0, HFBUSCLKEN0_LE | HFBUSCLKEN0_GPIO);
        CMU.write(LFACLKSEL, LFCLKSEL_ULFRCO);
        CMU.write(LFBCLKSEL, LFCLKSEL_LFXO);
    }

    /// Stops LFXO ahead of EM3; ULFRCO keeps the timer branch alive.
    pub fn suspend_lfxo() {
        CMU.write(OSCENCMD, OSCENCMD_LFXODIS);
    }

    pub fn resume_lfxo() {
        CMU.write(OSCENCMD, OSCENCMD_LFXOEN);
        while CMU.read(STATUS) & STATUS_LFXORDY == 0 {
            core::hint::spin_loop();
        }
    }

    /// Gates on the high-frequency peripheral clocks in `bits`.
    pub fn enable_hfper(bits: u32) {
        CMU.set_bits(HFPERCLKEN0, bits);
    }

    pub fn enable_letimer0() {
        CMU.set_bits(LFACLKEN0, LFACLKEN0_LETIMER0);
    }

    pub fn enable_leuart0() {
        CMU.set_bits(LFBCLKEN0, LFBCLKEN0_LEUART0);
    }
}
