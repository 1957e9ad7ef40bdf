//! Deferred-work scheduler.
//!
//! Interrupt handlers post [`Event`]s; the main loop drains them in a fixed
//! order. The pending set is a single 32-bit word touched only inside a
//! critical section, so posting from an ISR never races the main loop's
//! read-modify-write.

mod main_loop;

pub use main_loop::{EventHandler, MainLoop, Pass};

use core::cell::Cell;
use core::fmt;

use critical_section::Mutex;

/// Deferred-work identifiers, one bit each.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    TimerCompareA,
    TimerCompareB,
    TimerUnderflow,
    SensorReadComplete,
    Boot,
    SerialTxComplete,
}

/// Order in which the main loop services pending events.
pub const DISPATCH_ORDER: [Event; 6] = [
    Event::TimerCompareA,
    Event::TimerCompareB,
    Event::TimerUnderflow,
    Event::SensorReadComplete,
    Event::Boot,
    Event::SerialTxComplete,
];

impl Event {
    /// Bit assigned to this event in the pending word.
    pub const fn bit(self) -> u32 {
        match self {
            Event::TimerCompareA => 0x01,
            Event::TimerCompareB => 0x02,
            Event::TimerUnderflow => 0x04,
            Event::SensorReadComplete => 0x08,
            Event::Boot => 0x10,
            Event::SerialTxComplete => 0x20,
        }
    }

    /// Short lowercase name used in transcripts.
    pub const fn label(self) -> &'static str {
        match self {
            Event::TimerCompareA => "compare-a",
            Event::TimerCompareB => "compare-b",
            Event::TimerUnderflow => "underflow",
            Event::SensorReadComplete => "sensor-read",
            Event::Boot => "boot",
            Event::SerialTxComplete => "serial-complete",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Snapshot of pending events.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventSet(u32);

impl EventSet {
    /// Set containing no events.
    pub const EMPTY: Self = Self(0);

    /// Wraps a raw pending word.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw pending word.
    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, event: Event) -> bool {
        self.0 & event.bit() != 0
    }

    #[must_use]
    pub const fn with(self, event: Event) -> Self {
        Self(self.0 | event.bit())
    }

    #[must_use]
    pub const fn without(self, event: Event) -> Self {
        Self(self.0 & !event.bit())
    }

    /// Iterates the contained events in dispatch order.
    pub fn iter(self) -> impl Iterator<Item = Event> {
        DISPATCH_ORDER
            .into_iter()
            .filter(move |event| self.contains(*event))
    }
}

impl From<Event> for EventSet {
    fn from(event: Event) -> Self {
        Self(event.bit())
    }
}

impl FromIterator<Event> for EventSet {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, EventSet::with)
    }
}

/// Interrupt-safe set of pending events.
pub struct EventScheduler {
    pending: Mutex<Cell<u32>>,
}

impl EventScheduler {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: Mutex::new(Cell::new(0)),
        }
    }

    /// Discards everything pending. Called once at startup.
    pub fn open(&self) {
        critical_section::with(|cs| self.pending.borrow(cs).set(0));
    }

    /// Marks `event` pending. Safe from interrupt context; posting twice is
    /// the same as posting once.
    pub fn post(&self, event: Event) {
        critical_section::with(|cs| {
            let cell = self.pending.borrow(cs);
            cell.set(cell.get() | event.bit());
        });
    }

    /// Clears `event`.
    pub fn clear(&self, event: Event) {
        critical_section::with(|cs| {
            let cell = self.pending.borrow(cs);
            cell.set(cell.get() & !event.bit());
        });
    }

    /// Returns a snapshot of the pending set.
    pub fn pending(&self) -> EventSet {
        critical_section::with(|cs| EventSet(self.pending.borrow(cs).get()))
    }
}

impl Default for EventScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_bits_are_distinct_and_match_board_assignment() {
        let bits: [u32; 6] = DISPATCH_ORDER.map(Event::bit);
        assert_eq!(bits, [0x01, 0x02, 0x04, 0x08, 0x10, 0x20]);
    }

    #[test]
    fn post_is_idempotent_and_clear_removes_only_its_bit() {
        let scheduler = EventScheduler::new();
        scheduler.post(Event::Boot);
        scheduler.post(Event::Boot);
        scheduler.post(Event::TimerUnderflow);

        assert_eq!(scheduler.pending().bits(), 0x14);

        scheduler.clear(Event::Boot);
        assert_eq!(scheduler.pending(), EventSet::from(Event::TimerUnderflow));

        scheduler.clear(Event::Boot);
        assert_eq!(scheduler.pending(), EventSet::from(Event::TimerUnderflow));
    }

    #[test]
    fn open_discards_pending_events() {
        let scheduler = EventScheduler::new();
        scheduler.post(Event::SerialTxComplete);
        scheduler.open();

        assert!(scheduler.pending().is_empty());
    }

    #[test]
    fn set_iterates_in_dispatch_order() {
        let set: EventSet = [Event::Boot, Event::TimerCompareA, Event::SensorReadComplete]
            .into_iter()
            .collect();

        let mut order = heapless::Vec::<Event, 6>::new();
        order.extend(set.iter());
        assert_eq!(
            order.as_slice(),
            &[Event::TimerCompareA, Event::SensorReadComplete, Event::Boot]
        );
    }
}
