//! Low-energy PWM timer driving the measurement cadence.
//!
//! The timer counts down from the period value; compare-B marks the end of
//! the active window and underflow the end of the period. Each enabled
//! interrupt posts the event configured for it.

use core::cell::RefCell;
use core::fmt;
use core::time::Duration;

use critical_section::Mutex;

use crate::config::{PWM_ACTIVE_PERIOD, PWM_PERIOD, TIMER_CLOCK_HZ, TIMER_SLEEP_BLOCK};
use crate::scheduler::{Event, EventScheduler};
use crate::sleep::{EnergyArbiter, VoteError};

/// Largest compare value the 16-bit counter can hold.
pub const MAX_TIMER_TICKS: u32 = 0xFFFF;

/// Timer interrupt sources.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerCondition {
    CompareA,
    CompareB,
    Underflow,
}

impl TimerCondition {
    const fn bit(self) -> u8 {
        match self {
            TimerCondition::CompareA => 0x01,
            TimerCondition::CompareB => 0x02,
            TimerCondition::Underflow => 0x04,
        }
    }
}

/// Set of timer interrupt sources.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerConditions(u8);

impl TimerConditions {
    pub const NONE: Self = Self(0);

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, condition: TimerCondition) -> bool {
        self.0 & condition.bit() != 0
    }

    #[must_use]
    pub const fn with(self, condition: TimerCondition) -> Self {
        Self(self.0 | condition.bit())
    }

    pub fn iter(self) -> impl Iterator<Item = TimerCondition> {
        [
            TimerCondition::CompareA,
            TimerCondition::CompareB,
            TimerCondition::Underflow,
        ]
        .into_iter()
        .filter(move |condition| self.contains(*condition))
    }
}

impl From<TimerCondition> for TimerConditions {
    fn from(condition: TimerCondition) -> Self {
        Self(condition.bit())
    }
}

/// Application-facing timer configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TimerConfig {
    /// Full PWM period.
    pub period: Duration,
    /// High portion of each period.
    pub active_period: Duration,
    pub out0_enabled: bool,
    pub out1_enabled: bool,
    /// Event posted on compare A; `None` leaves the interrupt disabled.
    pub compare_a: Option<Event>,
    pub compare_b: Option<Event>,
    pub underflow: Option<Event>,
    /// Keep counting while a debugger halts the core.
    pub debug_run: bool,
}

impl TimerConfig {
    /// Measurement cadence used by the node: compare-B and underflow only.
    pub const fn new() -> Self {
        Self {
            period: PWM_PERIOD,
            active_period: PWM_ACTIVE_PERIOD,
            out0_enabled: true,
            out1_enabled: true,
            compare_a: None,
            compare_b: Some(Event::TimerCompareB),
            underflow: Some(Event::TimerUnderflow),
            debug_run: false,
        }
    }

    /// Interrupt sources with an event attached.
    pub const fn interrupts(&self) -> TimerConditions {
        let mut set = TimerConditions::NONE;
        if self.compare_a.is_some() {
            set = set.with(TimerCondition::CompareA);
        }
        if self.compare_b.is_some() {
            set = set.with(TimerCondition::CompareB);
        }
        if self.underflow.is_some() {
            set = set.with(TimerCondition::Underflow);
        }
        set
    }

    const fn event_for(&self, condition: TimerCondition) -> Option<Event> {
        match condition {
            TimerCondition::CompareA => self.compare_a,
            TimerCondition::CompareB => self.compare_b,
            TimerCondition::Underflow => self.underflow,
        }
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Register values derived from a [`TimerConfig`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmSettings {
    /// Reload value (compare 0).
    pub period_ticks: u32,
    /// Active window (compare 1).
    pub active_ticks: u32,
    pub out0_enabled: bool,
    pub out1_enabled: bool,
    pub debug_run: bool,
}

impl PwmSettings {
    pub fn from_config(config: &TimerConfig) -> Result<Self, TimerError> {
        let period_ticks = ticks(config.period).ok_or(TimerError::PeriodOutOfRange)?;
        let active_ticks = ticks(config.active_period).ok_or(TimerError::PeriodOutOfRange)?;
        if period_ticks == 0 || active_ticks > period_ticks {
            return Err(TimerError::PeriodOutOfRange);
        }
        Ok(Self {
            period_ticks,
            active_ticks,
            out0_enabled: config.out0_enabled,
            out1_enabled: config.out1_enabled,
            debug_run: config.debug_run,
        })
    }
}

/// Converts `duration` to timer ticks, or `None` if the counter can't hold it.
pub fn ticks(duration: Duration) -> Option<u32> {
    let ticks = duration.as_micros() * u128::from(TIMER_CLOCK_HZ) / 1_000_000;
    u32::try_from(ticks).ok().filter(|&t| t <= MAX_TIMER_TICKS)
}

/// Register-level access to the PWM timer. Called with interrupts masked.
pub trait PeriodicTimer {
    fn is_running(&self) -> bool;

    fn set_running(&mut self, running: bool);

    /// Programs PWM mode with `settings`; the counter must be stopped.
    fn program(&mut self, settings: &PwmSettings);

    /// Clears every pending flag and enables exactly `enabled`.
    fn set_interrupts(&mut self, enabled: TimerConditions);

    /// Returns and clears the enabled, pending conditions.
    fn take_pending(&mut self) -> TimerConditions;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerError {
    /// Period or active window does not fit the counter.
    PeriodOutOfRange,
    Vote(VoteError),
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerError::PeriodOutOfRange => f.write_str("period out of range"),
            TimerError::Vote(err) => write!(f, "{err}"),
        }
    }
}

impl From<VoteError> for TimerError {
    fn from(err: VoteError) -> Self {
        TimerError::Vote(err)
    }
}

struct Inner<T> {
    timer: T,
    config: TimerConfig,
}

/// PWM timer driver posting configured events.
pub struct TimerDriver<'a, T> {
    inner: Mutex<RefCell<Inner<T>>>,
    arbiter: &'a EnergyArbiter,
    scheduler: &'a EventScheduler,
}

impl<'a, T> TimerDriver<'a, T>
where
    T: PeriodicTimer,
{
    pub const fn new(timer: T, arbiter: &'a EnergyArbiter, scheduler: &'a EventScheduler) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                timer,
                config: TimerConfig::new(),
            })),
            arbiter,
            scheduler,
        }
    }

    /// Stops the timer and reprograms it for `config`.
    pub fn open(&self, config: TimerConfig) -> Result<(), TimerError> {
        let settings = PwmSettings::from_config(&config)?;
        self.start(false)?;
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            inner.timer.program(&settings);
            if inner.timer.is_running() {
                self.arbiter.block(TIMER_SLEEP_BLOCK)?;
            }
            inner.timer.set_interrupts(config.interrupts());
            inner.config = config;
            Ok(())
        })
    }

    /// Starts or stops counting, keeping the sleep vote in step.
    pub fn start(&self, enable: bool) -> Result<(), TimerError> {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let running = inner.timer.is_running();
            if enable && !running {
                self.arbiter.block(TIMER_SLEEP_BLOCK)?;
            } else if !enable && running {
                self.arbiter.unblock(TIMER_SLEEP_BLOCK)?;
            }
            inner.timer.set_running(enable);
            Ok(())
        })
    }

    /// Services the timer interrupt.
    pub fn on_interrupt(&self) {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let pending = inner.timer.take_pending();
            for condition in pending.iter() {
                if let Some(event) = inner.config.event_for(condition) {
                    self.scheduler.post(event);
                }
            }
        });
    }

    pub fn is_running(&self) -> bool {
        critical_section::with(|cs| self.inner.borrow_ref(cs).timer.is_running())
    }

    /// Runs `f` against the timer with interrupts masked.
    pub fn with_timer<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs).timer))
    }
}
