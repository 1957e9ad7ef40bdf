//! Low-energy UART, transmit side only.

use node_core::serial::{SerialCondition, SerialConditions, SerialPort};

use super::{Block, Irq, cmu};

const CTRL: usize = 0x000;
const CMD: usize = 0x004;
const STATUS: usize = 0x008;
const CLKDIV: usize = 0x00C;
const TXDATA: usize = 0x028;
const IF: usize = 0x02C;
const IFC: usize = 0x034;
const IEN: usize = 0x038;
const SYNCBUSY: usize = 0x044;
const ROUTEPEN: usize = 0x054;
const ROUTELOC0: usize = 0x058;

const CMD_RXEN: u32 = 1 << 0;
const CMD_TXEN: u32 = 1 << 2;
const CMD_CLEARTX: u32 = 1 << 6;
const CMD_CLEARRX: u32 = 1 << 7;
const STATUS_RXENS: u32 = 1 << 0;
const STATUS_TXENS: u32 = 1 << 1;

const IF_TXC: u32 = 1 << 0;
const IF_TXBL: u32 = 1 << 1;
const IF_ALL: u32 = 0x7F9;

const ROUTEPEN_RXPEN: u32 = 1 << 0;
const ROUTEPEN_TXPEN: u32 = 1 << 1;

/// LFXO frequency feeding the serial clock branch.
const LFB_CLOCK_HZ: u32 = 32_768;

pub struct Leuart {
    regs: Block,
}

impl Leuart {
    pub const LEUART0: Self = Self {
        regs: Block::at(0x4004_A000),
    };

    /// 8N1 at `baud_rate`, TX and RX routed to `location`.
    pub fn open(&mut self, baud_rate: u32, location: u32) {
        cmu::enable_leuart0();
        self.regs.write(CTRL, 0);
        self.regs.wait_clear(SYNCBUSY, u32::MAX);

        // CLKDIV = 256 * (f / baud - 1), in the register's 8.3 fixed-point form.
        let divider = (256 * LFB_CLOCK_HZ / baud_rate).saturating_sub(256) & !0x7;
        self.regs.write(CLKDIV, divider);
        self.regs.write(ROUTELOC0, (location << 8) | location);
        self.regs.set_bits(ROUTEPEN, ROUTEPEN_RXPEN | ROUTEPEN_TXPEN);
        self.regs.wait_clear(SYNCBUSY, u32::MAX);

        self.regs.write(CMD, CMD_CLEARTX | CMD_CLEARRX);
        self.regs.wait_clear(SYNCBUSY, u32::MAX);
        self.regs.write(CMD, CMD_TXEN | CMD_RXEN);
        let enabled = STATUS_TXENS | STATUS_RXENS;
        while self.regs.read(STATUS) & enabled != enabled {
            core::hint::spin_loop();
        }

        self.regs.write(IFC, IF_ALL);
        Irq::Leuart0.enable();
    }

    const fn flag(condition: SerialCondition) -> u32 {
        match condition {
            SerialCondition::BufferEmpty => IF_TXBL,
            SerialCondition::TransmitComplete => IF_TXC,
        }
    }
}

impl SerialPort for Leuart {
    fn enable_interrupt(&mut self, condition: SerialCondition) {
        // TXC latches at the end of every frame; only a fresh one counts.
        if condition == SerialCondition::TransmitComplete {
            self.regs.write(IFC, IF_TXC);
        }
        self.regs.set_bits(IEN, Self::flag(condition));
    }

    fn disable_interrupt(&mut self, condition: SerialCondition) {
        self.regs.clear_bits(IEN, Self::flag(condition));
    }

    fn write(&mut self, byte: u8) {
        self.regs.write(TXDATA, u32::from(byte));
    }

    fn take_pending(&mut self) -> SerialConditions {
        let flags = self.regs.read(IF) & self.regs.read(IEN);
        self.regs.write(IFC, flags & IF_TXC);

        let mut pending = SerialConditions::NONE;
        if flags & IF_TXBL != 0 {
            pending = pending.with(SerialCondition::BufferEmpty);
        }
        if flags & IF_TXC != 0 {
            pending = pending.with(SerialCondition::TransmitComplete);
        }
        pending
    }
}
