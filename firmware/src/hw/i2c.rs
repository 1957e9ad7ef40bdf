//! I2C controller in single-master mode.

use node_core::bus::{BusCommand, BusCondition, BusConditions, BusController};

use super::{Block, Irq, cmu};

const CTRL: usize = 0x000;
const CMD: usize = 0x004;
const STATE: usize = 0x008;
const CLKDIV: usize = 0x010;
const RXDATA: usize = 0x01C;
const TXDATA: usize = 0x02C;
const IF: usize = 0x034;
const IFC: usize = 0x03C;
const IEN: usize = 0x040;
const ROUTEPEN: usize = 0x044;
const ROUTELOC0: usize = 0x048;

const CTRL_EN: u32 = 1 << 0;
/// Asymmetric 6:3 clock low/high ratio.
const CTRL_CLHR_ASYMMETRIC: u32 = 1 << 12;
const STATE_STATE_MASK: u32 = 0b111 << 5;

const IF_ACK: u32 = 1 << 6;
const IF_RXDATAV: u32 = 1 << 5;
const IF_MSTOP: u32 = 1 << 8;
const IF_ALL: u32 = 0x0007_FFFF;

const ROUTEPEN_SDAPEN: u32 = 1 << 0;
const ROUTEPEN_SCLPEN: u32 = 1 << 1;

/// Pin routing for one controller instance.
#[derive(Copy, Clone, Debug)]
pub struct Route {
    pub scl_location: u32,
    pub sda_location: u32,
}

/// One I2C controller instance.
pub struct I2c {
    regs: Block,
    irq: Irq,
    clock: u32,
}

impl I2c {
    /// Expansion-header controller; nothing is fitted on the board.
    pub const I2C0: Self = Self {
        regs: Block::at(0x4000_C000),
        irq: Irq::I2c0,
        clock: cmu::HFPERCLKEN0_I2C0,
    };

    /// Wired to the Si1133.
    pub const I2C1: Self = Self {
        regs: Block::at(0x4000_C400),
        irq: Irq::I2c1,
        clock: cmu::HFPERCLKEN0_I2C1,
    };

    /// Enables the clock, routes the pins and unmasks ACK, RXDATAV and MSTOP.
    ///
    /// `clock_divider` sets fast mode (~400 kHz) from the peripheral clock.
    /// The bus engine's own `open` performs the recovery sequence afterwards.
    pub fn open(&mut self, route: Route, clock_divider: u32) {
        cmu::enable_hfper(self.clock);
        self.regs.write(CTRL, CTRL_CLHR_ASYMMETRIC);
        self.regs.write(CLKDIV, clock_divider);
        self.regs
            .write(ROUTELOC0, (route.scl_location << 8) | route.sda_location);
        self.regs.set_bits(ROUTEPEN, ROUTEPEN_SDAPEN | ROUTEPEN_SCLPEN);
        self.regs.write(IFC, IF_ALL);
        self.regs.write(IEN, IF_ACK | IF_RXDATAV | IF_MSTOP);
        self.regs.set_bits(CTRL, CTRL_EN);
        self.irq.enable();
    }
}

impl BusController for I2c {
    fn command(&mut self, command: BusCommand) {
        self.regs.write(CMD, u32::from(command.bits()));
    }

    fn transmit(&mut self, byte: u8) {
        self.regs.write(TXDATA, u32::from(byte));
    }

    fn receive(&mut self) -> u8 {
        (self.regs.read(RXDATA) & 0xFF) as u8
    }

    fn is_idle(&self) -> bool {
        self.regs.read(STATE) & STATE_STATE_MASK == 0
    }

    fn interrupt_mask(&self) -> u32 {
        self.regs.read(IEN)
    }

    fn set_interrupt_mask(&mut self, mask: u32) {
        self.regs.write(IEN, mask);
    }

    fn clear_flags(&mut self) {
        self.regs.write(IFC, IF_ALL);
    }

    fn stop_detected(&self) -> bool {
        self.regs.read(IF) & IF_MSTOP != 0
    }

    fn take_pending(&mut self) -> BusConditions {
        let flags = self.regs.read(IF) & self.regs.read(IEN);
        self.regs.write(IFC, flags);

        let mut pending = BusConditions::NONE;
        if flags & IF_ACK != 0 {
            pending = pending.with(BusCondition::Ack);
        }
        if flags & IF_RXDATAV != 0 {
            pending = pending.with(BusCondition::DataReceived);
        }
        if flags & IF_MSTOP != 0 {
            pending = pending.with(BusCondition::Stop);
        }
        pending
    }
}
