mod common;

use common::with_interrupt_line;
use node_core::fault::Fault;
use node_core::scheduler::{Event, EventHandler, EventScheduler, MainLoop, Pass};
use node_core::sleep::{EnergyArbiter, EnergyMode, SleepController};

const ROUNDS: usize = 20_000;

#[test]
fn concurrent_posts_and_clears_keep_every_bit() {
    let scheduler = EventScheduler::new();

    with_interrupt_line(
        || {
            scheduler.post(Event::TimerUnderflow);
            scheduler.clear(Event::TimerUnderflow);
        },
        || {
            for _ in 0..ROUNDS {
                scheduler.post(Event::TimerCompareB);
                assert!(scheduler.pending().contains(Event::TimerCompareB));
                scheduler.clear(Event::TimerCompareB);
                assert!(!scheduler.pending().contains(Event::TimerCompareB));
            }
        },
    );

    assert!(scheduler.pending().is_empty());
}

#[test]
fn concurrent_paired_votes_return_to_zero() {
    let arbiter = EnergyArbiter::new();

    with_interrupt_line(
        || {
            arbiter.block(EnergyMode::Em2).expect("interrupt vote");
            arbiter.unblock(EnergyMode::Em2).expect("interrupt release");
        },
        || {
            for _ in 0..ROUNDS {
                arbiter.block(EnergyMode::Em2).unwrap();
                arbiter.block(EnergyMode::Em3).unwrap();
                arbiter.unblock(EnergyMode::Em3).unwrap();
                arbiter.unblock(EnergyMode::Em2).unwrap();
            }
        },
    );

    assert_eq!(arbiter.votes(EnergyMode::Em2), 0);
    assert_eq!(arbiter.votes(EnergyMode::Em3), 0);
    assert_eq!(arbiter.deepest_blocked(), None);
}

#[derive(Default)]
struct Drain {
    handled: usize,
}

impl EventHandler for Drain {
    fn handle(&mut self, _event: Event) -> Result<(), Fault> {
        self.handled += 1;
        Ok(())
    }
}

/// Counts sleeps issued while an event was still waiting.
struct WatchfulSleeper<'a> {
    scheduler: &'a EventScheduler,
    entries: usize,
    with_work_pending: usize,
}

impl SleepController for WatchfulSleeper<'_> {
    fn enter(&mut self, _mode: EnergyMode) {
        self.entries += 1;
        if !self.scheduler.pending().is_empty() {
            self.with_work_pending += 1;
        }
    }
}

#[test]
fn never_sleeps_over_an_event_posted_by_an_interrupt() {
    let scheduler = EventScheduler::new();
    let arbiter = EnergyArbiter::new();
    let sleeper = WatchfulSleeper {
        scheduler: &scheduler,
        entries: 0,
        with_work_pending: 0,
    };
    let mut main_loop = MainLoop::new(&scheduler, &arbiter, Drain::default(), sleeper);

    let dispatched = with_interrupt_line(
        || scheduler.post(Event::SensorReadComplete),
        || {
            let mut dispatched = 0;
            for _ in 0..ROUNDS {
                if let Pass::Dispatched(_) = main_loop.service().unwrap() {
                    dispatched += 1;
                }
            }
            dispatched
        },
    );

    assert_eq!(main_loop.sleeper().with_work_pending, 0);
    assert_eq!(main_loop.handler().handled, dispatched);
}
