use crate::fault::Fault;
use crate::sleep::{EnergyArbiter, SleepController, SleepDecision};

use super::{DISPATCH_ORDER, Event, EventScheduler, EventSet};

/// Application callbacks run by the main loop.
pub trait EventHandler {
    /// Runs the work associated with `event` to completion.
    fn handle(&mut self, event: Event) -> Result<(), Fault>;
}

/// Result of one [`MainLoop::service`] pass.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pass {
    /// Nothing was pending; the arbiter decided how deeply to sleep.
    Slept(SleepDecision),
    /// The events handled during this pass.
    Dispatched(EventSet),
}

/// Cooperative superloop: drain pending events, otherwise sleep.
pub struct MainLoop<'a, H, S> {
    scheduler: &'a EventScheduler,
    arbiter: &'a EnergyArbiter,
    handler: H,
    sleeper: S,
}

impl<'a, H, S> MainLoop<'a, H, S>
where
    H: EventHandler,
    S: SleepController,
{
    pub const fn new(
        scheduler: &'a EventScheduler,
        arbiter: &'a EnergyArbiter,
        handler: H,
        sleeper: S,
    ) -> Self {
        Self {
            scheduler,
            arbiter,
            handler,
            sleeper,
        }
    }

    /// Performs one scheduler pass.
    ///
    /// The pending set is sampled once; events posted while a handler runs are
    /// picked up by the next pass. Each handler runs after its bit is cleared
    /// so it may re-post itself. The core only sleeps if the set is still
    /// empty once interrupts are masked for the sleep instruction.
    pub fn service(&mut self) -> Result<Pass, Fault> {
        let mut snapshot = self.scheduler.pending();
        if snapshot.is_empty() {
            let scheduler = self.scheduler;
            let slept = self.arbiter.enter_sleep_unless(&mut self.sleeper, || {
                !scheduler.pending().is_empty()
            });
            if let Some(decision) = slept {
                return Ok(Pass::Slept(decision));
            }
            snapshot = self.scheduler.pending();
        }

        for event in DISPATCH_ORDER {
            if snapshot.contains(event) {
                self.scheduler.clear(event);
                self.handler.handle(event)?;
            }
        }
        Ok(Pass::Dispatched(snapshot))
    }

    /// Services passes until a handler fails.
    pub fn run(&mut self) -> Fault {
        loop {
            if let Err(fault) = self.service() {
                return fault;
            }
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    pub fn sleeper_mut(&mut self) -> &mut S {
        &mut self.sleeper
    }
}
