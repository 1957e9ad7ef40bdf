//! LETIMER0 in free-running PWM mode.

use node_core::timer::{PeriodicTimer, PwmSettings, TimerCondition, TimerConditions};

use super::{Block, Irq, cmu};

const CTRL: usize = 0x000;
const CMD: usize = 0x004;
const STATUS: usize = 0x008;
const CNT: usize = 0x00C;
const COMP0: usize = 0x010;
const COMP1: usize = 0x014;
const REP0: usize = 0x018;
const REP1: usize = 0x01C;
const IF: usize = 0x020;
const IFC: usize = 0x028;
const IEN: usize = 0x02C;
const SYNCBUSY: usize = 0x034;
const ROUTEPEN: usize = 0x040;
const ROUTELOC0: usize = 0x044;

const CMD_START: u32 = 1 << 0;
const CMD_STOP: u32 = 1 << 1;
const STATUS_RUNNING: u32 = 1 << 0;

const CTRL_UFOA0_PWM: u32 = 3 << 2;
const CTRL_UFOA1_PWM: u32 = 3 << 4;
const CTRL_COMP0TOP: u32 = 1 << 9;
const CTRL_DEBUGRUN: u32 = 1 << 12;

const IF_COMP0: u32 = 1 << 0;
const IF_COMP1: u32 = 1 << 1;
const IF_UF: u32 = 1 << 2;
const IF_ALL: u32 = 0x1F;

const ROUTEPEN_OUT0PEN: u32 = 1 << 0;
const ROUTEPEN_OUT1PEN: u32 = 1 << 1;

/// Non-zero repeat counts keep the PWM outputs toggling.
const PWM_REPEAT: u32 = 3;

pub struct Letimer {
    regs: Block,
    out0_location: u32,
    out1_location: u32,
}

impl Letimer {
    pub const fn letimer0(out0_location: u32, out1_location: u32) -> Self {
        Self {
            regs: Block::at(0x4004_6000),
            out0_location,
            out1_location,
        }
    }

    /// Enables the clock and the interrupt line. Programming happens through
    /// the timer driver.
    pub fn power_up(&mut self) {
        cmu::enable_letimer0();
        self.regs.write(IFC, IF_ALL);
        Irq::Letimer0.enable();
    }

    fn sync(&self) {
        self.regs.wait_clear(SYNCBUSY, u32::MAX);
    }

    const fn flag(condition: TimerCondition) -> u32 {
        match condition {
            TimerCondition::CompareA => IF_COMP0,
            TimerCondition::CompareB => IF_COMP1,
            TimerCondition::Underflow => IF_UF,
        }
    }
}

impl PeriodicTimer for Letimer {
    fn is_running(&self) -> bool {
        self.regs.read(STATUS) & STATUS_RUNNING != 0
    }

    fn set_running(&mut self, running: bool) {
        self.regs.write(CMD, if running { CMD_START } else { CMD_STOP });
        self.sync();
    }

    fn program(&mut self, settings: &PwmSettings) {
        let mut ctrl = CTRL_UFOA0_PWM | CTRL_UFOA1_PWM | CTRL_COMP0TOP;
        if settings.debug_run {
            ctrl |= CTRL_DEBUGRUN;
        }
        self.regs.write(CTRL, ctrl);
        // Start from zero so the first underflow loads COMP0 right away.
        self.regs.write(CNT, 0);
        self.regs.write(COMP0, settings.period_ticks);
        self.regs.write(COMP1, settings.active_ticks);
        self.regs.write(REP0, PWM_REPEAT);
        self.regs.write(REP1, PWM_REPEAT);
        self.sync();

        self.regs
            .write(ROUTELOC0, (self.out1_location << 8) | self.out0_location);
        let mut pins = 0;
        if settings.out0_enabled {
            pins |= ROUTEPEN_OUT0PEN;
        }
        if settings.out1_enabled {
            pins |= ROUTEPEN_OUT1PEN;
        }
        self.regs.write(ROUTEPEN, pins);
    }

    fn set_interrupts(&mut self, enabled: TimerConditions) {
        self.regs.write(IFC, IF_ALL);
        let mask = enabled.iter().fold(0, |mask, c| mask | Self::flag(c));
        self.regs.write(IEN, mask);
    }

    fn take_pending(&mut self) -> TimerConditions {
        let flags = self.regs.read(IF) & self.regs.read(IEN);
        self.regs.write(IFC, flags);

        [
            TimerCondition::CompareA,
            TimerCondition::CompareB,
            TimerCondition::Underflow,
        ]
        .into_iter()
        .filter(|c| flags & Self::flag(*c) != 0)
        .fold(TimerConditions::NONE, TimerConditions::with)
    }
}
