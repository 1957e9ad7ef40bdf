//! Energy-mode arbitration.
//!
//! Peripherals that need a clock to keep running vote against the sleep depth
//! that would stop it. Votes are reference counted per depth so independent
//! drivers can hold and release them without clobbering each other; the main
//! loop asks the arbiter for the deepest state nobody objects to before it
//! halts the core.

use core::cell::RefCell;
use core::fmt;

use critical_section::Mutex;

/// Number of energy modes tracked by the arbiter.
pub const ENERGY_MODE_COUNT: usize = 5;

/// A counter reaching this value means some driver blocks without unblocking.
pub const MAX_VOTES_PER_MODE: u8 = 5;

/// Hardware power states, shallowest first.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EnergyMode {
    /// Fully active.
    Em0,
    /// Sleep: core halted, high-frequency peripherals running.
    Em1,
    /// Deep sleep: low-frequency peripherals running.
    Em2,
    /// Stop: only ultra-low-frequency clocks and asynchronous wakeups.
    Em3,
    /// Shutoff.
    Em4,
}

/// Every energy mode in scan order.
pub const ALL_ENERGY_MODES: [EnergyMode; ENERGY_MODE_COUNT] = [
    EnergyMode::Em0,
    EnergyMode::Em1,
    EnergyMode::Em2,
    EnergyMode::Em3,
    EnergyMode::Em4,
];

impl EnergyMode {
    /// Deepest mode the sleep routine will ever request.
    pub const DEEPEST_SUPPORTED: EnergyMode = EnergyMode::Em3;

    /// Deterministic index into the vote table.
    pub const fn as_index(self) -> usize {
        match self {
            EnergyMode::Em0 => 0,
            EnergyMode::Em1 => 1,
            EnergyMode::Em2 => 2,
            EnergyMode::Em3 => 3,
            EnergyMode::Em4 => 4,
        }
    }

    /// Attempts to construct an [`EnergyMode`] from a raw index.
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(EnergyMode::Em0),
            1 => Some(EnergyMode::Em1),
            2 => Some(EnergyMode::Em2),
            3 => Some(EnergyMode::Em3),
            4 => Some(EnergyMode::Em4),
            _ => None,
        }
    }

    /// Returns the next shallower mode, or `None` for [`EnergyMode::Em0`].
    pub const fn shallower(self) -> Option<Self> {
        match self {
            EnergyMode::Em0 => None,
            EnergyMode::Em1 => Some(EnergyMode::Em0),
            EnergyMode::Em2 => Some(EnergyMode::Em1),
            EnergyMode::Em3 => Some(EnergyMode::Em2),
            EnergyMode::Em4 => Some(EnergyMode::Em3),
        }
    }
}

impl fmt::Display for EnergyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EM{}", self.as_index())
    }
}

/// Unbalanced use of [`EnergyArbiter::block`] / [`EnergyArbiter::unblock`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VoteError {
    /// Blocking again would reach [`MAX_VOTES_PER_MODE`].
    Overflow(EnergyMode),
    /// Unblock without a matching block.
    Underflow(EnergyMode),
}

impl fmt::Display for VoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteError::Overflow(mode) => write!(f, "sleep vote overflow on {mode}"),
            VoteError::Underflow(mode) => write!(f, "sleep vote underflow on {mode}"),
        }
    }
}

/// Outcome of [`EnergyArbiter::enter_sleep`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SleepDecision {
    /// EM0 or EM1 is blocked; no sleep instruction was issued.
    StayAwake,
    /// The processor was put into the given mode.
    Entered(EnergyMode),
}

/// Hardware hook that actually halts the core.
///
/// Called with interrupts masked. Implementations must return once an
/// interrupt is pending; the caller restores the interrupt mask afterwards.
pub trait SleepController {
    /// Halts the core in `mode` (one of EM1..=EM3).
    fn enter(&mut self, mode: EnergyMode);
}

/// Reference-counted sleep-depth votes.
pub struct EnergyArbiter {
    votes: Mutex<RefCell<[u8; ENERGY_MODE_COUNT]>>,
}

impl EnergyArbiter {
    /// Creates an arbiter with every counter at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            votes: Mutex::new(RefCell::new([0; ENERGY_MODE_COUNT])),
        }
    }

    /// Resets every counter to zero.
    pub fn open(&self) {
        critical_section::with(|cs| {
            *self.votes.borrow_ref_mut(cs) = [0; ENERGY_MODE_COUNT];
        });
    }

    /// Forbids entering `mode` or anything deeper until a matching unblock.
    ///
    /// Returns the new vote count for `mode`.
    pub fn block(&self, mode: EnergyMode) -> Result<u8, VoteError> {
        critical_section::with(|cs| {
            let mut votes = self.votes.borrow_ref_mut(cs);
            let slot = &mut votes[mode.as_index()];
            let next = slot.saturating_add(1);
            if next >= MAX_VOTES_PER_MODE {
                return Err(VoteError::Overflow(mode));
            }
            *slot = next;
            Ok(next)
        })
    }

    /// Releases one vote previously taken with [`EnergyArbiter::block`].
    ///
    /// Returns the remaining vote count for `mode`.
    pub fn unblock(&self, mode: EnergyMode) -> Result<u8, VoteError> {
        critical_section::with(|cs| {
            let mut votes = self.votes.borrow_ref_mut(cs);
            let slot = &mut votes[mode.as_index()];
            let next = slot.checked_sub(1).ok_or(VoteError::Underflow(mode))?;
            *slot = next;
            Ok(next)
        })
    }

    /// Returns the number of outstanding votes against `mode`.
    pub fn votes(&self, mode: EnergyMode) -> u8 {
        critical_section::with(|cs| self.votes.borrow_ref(cs)[mode.as_index()])
    }

    /// Returns the shallowest mode with an outstanding vote.
    pub fn deepest_blocked(&self) -> Option<EnergyMode> {
        critical_section::with(|cs| first_blocked(&self.votes.borrow_ref(cs)))
    }

    /// Puts the processor into the deepest mode nobody is blocking.
    ///
    /// The vote check and the sleep instruction share one critical section so
    /// a vote taken by an interrupt cannot slip in between them.
    pub fn enter_sleep<S>(&self, sleeper: &mut S) -> SleepDecision
    where
        S: SleepController + ?Sized,
    {
        critical_section::with(|cs| {
            let target = sleep_target(first_blocked(&self.votes.borrow_ref(cs)));
            if let SleepDecision::Entered(mode) = target {
                sleeper.enter(mode);
            }
            target
        })
    }

    /// Like [`EnergyArbiter::enter_sleep`], but first evaluates `busy` inside
    /// the same critical section and skips the sleep when it reports work.
    ///
    /// Returns `None` when `busy` held the core awake.
    pub fn enter_sleep_unless<S>(
        &self,
        sleeper: &mut S,
        busy: impl FnOnce() -> bool,
    ) -> Option<SleepDecision>
    where
        S: SleepController + ?Sized,
    {
        critical_section::with(|_| {
            if busy() {
                None
            } else {
                Some(self.enter_sleep(sleeper))
            }
        })
    }
}

impl Default for EnergyArbiter {
    fn default() -> Self {
        Self::new()
    }
}

fn first_blocked(votes: &[u8; ENERGY_MODE_COUNT]) -> Option<EnergyMode> {
    votes
        .iter()
        .position(|&count| count != 0)
        .and_then(EnergyMode::from_index)
}

/// Maps the shallowest blocked mode to the sleep state that may be entered.
pub const fn sleep_target(blocked: Option<EnergyMode>) -> SleepDecision {
    match blocked {
        Some(EnergyMode::Em0 | EnergyMode::Em1) => SleepDecision::StayAwake,
        Some(mode) => match mode.shallower() {
            Some(allowed) => SleepDecision::Entered(allowed),
            None => SleepDecision::StayAwake,
        },
        None => SleepDecision::Entered(EnergyMode::DEEPEST_SUPPORTED),
    }
}
