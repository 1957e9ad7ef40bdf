//! Single-occupant resource guard.
//!
//! Each bus controller and serial channel allows one transaction in flight.
//! A [`Slot`] is the availability flag for that resource: `start` paths spin in
//! [`Slot::acquire`] until the previous occupant's completion interrupt calls
//! [`Slot::release`].

use portable_atomic::{AtomicBool, Ordering};

/// Availability flag for a resource that serves one caller at a time.
#[derive(Debug)]
pub struct Slot {
    available: AtomicBool,
}

impl Slot {
    /// Creates a slot that is unavailable until [`Slot::open`] is called.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            available: AtomicBool::new(false),
        }
    }

    /// Marks the resource ready for its first occupant.
    pub fn open(&self) {
        self.available.store(true, Ordering::Release);
    }

    /// Claims the slot if it is free.
    pub fn try_acquire(&self) -> bool {
        self.available
            .compare_exchange(true, false, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Spins until the slot is free, then claims it.
    pub fn acquire(&self) {
        while !self.try_acquire() {
            core::hint::spin_loop();
        }
    }

    /// Hands the slot back; called from the completion path.
    pub fn release(&self) {
        self.available.store(true, Ordering::Release);
    }

    /// Returns `true` when no occupant holds the slot.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }
}

impl Default for Slot {
    fn default() -> Self {
        Self::new()
    }
}
