//! Energy-mode entry through the Cortex-M sleep instructions.

use cortex_m::peripheral::SCB;
use node_core::sleep::{EnergyMode, SleepController};

use super::cmu;

/// Enters EM1 with a plain `wfi` and EM2 with SLEEPDEEP set.
///
/// EM3 additionally stops LFXO for the duration of the sleep and waits for it
/// to restart on wake-up, so only the ULFRCO-clocked timer keeps counting.
/// EM4 is never selected by the arbiter and is entered as EM3.
///
/// Called with interrupts masked: a pending interrupt still wakes the core
/// and its handler runs once the caller's critical section ends.
pub struct Emu {
    scb: SCB,
}

impl Emu {
    pub const fn new(scb: SCB) -> Self {
        Self { scb }
    }

    fn wait_for_interrupt(&mut self, deep: bool) {
        if deep {
            self.scb.set_sleepdeep();
        } else {
            self.scb.clear_sleepdeep();
        }
        cortex_m::asm::dsb();
        cortex_m::asm::wfi();
        self.scb.clear_sleepdeep();
    }
}

impl SleepController for Emu {
    fn enter(&mut self, mode: EnergyMode) {
        match mode {
            EnergyMode::Em0 => {}
            EnergyMode::Em1 => self.wait_for_interrupt(false),
            EnergyMode::Em2 => self.wait_for_interrupt(true),
            EnergyMode::Em3 | EnergyMode::Em4 => {
                cmu::suspend_lfxo();
                self.wait_for_interrupt(true);
                cmu::resume_lfxo();
            }
        }
    }
}
