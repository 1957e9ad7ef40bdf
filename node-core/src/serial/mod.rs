//! Interrupt-driven serial transmit.
//!
//! [`SerialEngine::start`] copies the payload and arms the buffer-empty
//! interrupt; each interrupt feeds one byte until the payload is drained,
//! then the engine waits for the shift register to finish before releasing
//! the channel and its sleep vote.

use core::cell::RefCell;
use core::fmt;

use critical_section::Mutex;
use heapless::Vec;

use crate::config::{SERIAL_PAYLOAD_CAPACITY, SERIAL_SLEEP_BLOCK};
use crate::scheduler::{Event, EventScheduler};
use crate::sleep::{EnergyArbiter, VoteError};
use crate::slot::Slot;

/// Copy of the bytes being sent.
pub type Payload = Vec<u8, SERIAL_PAYLOAD_CAPACITY>;

/// Transmit interrupt conditions.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SerialCondition {
    /// The transmit buffer can take another byte.
    BufferEmpty,
    /// The last frame left the shift register.
    TransmitComplete,
}

impl SerialCondition {
    const fn bit(self) -> u8 {
        match self {
            SerialCondition::BufferEmpty => 0x01,
            SerialCondition::TransmitComplete => 0x02,
        }
    }
}

/// Pending transmit conditions, serviced buffer-empty first.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SerialConditions(u8);

impl SerialConditions {
    pub const NONE: Self = Self(0);

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, condition: SerialCondition) -> bool {
        self.0 & condition.bit() != 0
    }

    #[must_use]
    pub const fn with(self, condition: SerialCondition) -> Self {
        Self(self.0 | condition.bit())
    }

    pub fn iter(self) -> impl Iterator<Item = SerialCondition> {
        [
            SerialCondition::BufferEmpty,
            SerialCondition::TransmitComplete,
        ]
        .into_iter()
        .filter(move |condition| self.contains(*condition))
    }
}

impl From<SerialCondition> for SerialConditions {
    fn from(condition: SerialCondition) -> Self {
        Self(condition.bit())
    }
}

/// Register-level access to one serial channel. Called with interrupts masked.
pub trait SerialPort {
    fn enable_interrupt(&mut self, condition: SerialCondition);

    fn disable_interrupt(&mut self, condition: SerialCondition);

    /// Loads one byte into the transmit buffer.
    fn write(&mut self, byte: u8);

    /// Returns and clears the enabled, pending conditions.
    fn take_pending(&mut self) -> SerialConditions;
}

/// Transmit state; the payload travels with the state that consumes it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum SerialState {
    /// Ready for a new payload.
    #[default]
    Idle,
    /// Feeding bytes from `payload[cursor..]`.
    WriteData { payload: Payload, cursor: usize },
    /// Payload drained; waiting for transmit-complete.
    Stop,
}

/// Data-free view of [`SerialState`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SerialPhase {
    Idle,
    WriteData,
    Stop,
}

impl SerialState {
    pub const fn phase(&self) -> SerialPhase {
        match self {
            SerialState::Idle => SerialPhase::Idle,
            SerialState::WriteData { .. } => SerialPhase::WriteData,
            SerialState::Stop => SerialPhase::Stop,
        }
    }
}

/// Fatal serial engine errors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SerialFault {
    ProtocolViolation {
        phase: SerialPhase,
        condition: SerialCondition,
    },
    /// Payload longer than [`SERIAL_PAYLOAD_CAPACITY`].
    PayloadTooLong(usize),
    /// Nothing to send; no frame would ever raise transmit-complete.
    EmptyPayload,
    Vote(VoteError),
}

impl fmt::Display for SerialFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerialFault::ProtocolViolation { phase, condition } => {
                write!(f, "unexpected {condition:?} in {phase:?}")
            }
            SerialFault::PayloadTooLong(len) => write!(
                f,
                "payload of {len} bytes exceeds {SERIAL_PAYLOAD_CAPACITY}"
            ),
            SerialFault::EmptyPayload => f.write_str("empty payload"),
            SerialFault::Vote(err) => write!(f, "{err}"),
        }
    }
}

impl From<VoteError> for SerialFault {
    fn from(err: VoteError) -> Self {
        SerialFault::Vote(err)
    }
}

struct Inner<P> {
    port: P,
    state: SerialState,
}

/// Transmit engine bound to one serial channel.
pub struct SerialEngine<'a, P> {
    inner: Mutex<RefCell<Inner<P>>>,
    slot: Slot,
    completion: Option<Event>,
    arbiter: &'a EnergyArbiter,
    scheduler: &'a EventScheduler,
}

impl<'a, P> SerialEngine<'a, P>
where
    P: SerialPort,
{
    /// `completion` is posted after every finished transmission.
    pub const fn new(
        port: P,
        completion: Option<Event>,
        arbiter: &'a EnergyArbiter,
        scheduler: &'a EventScheduler,
    ) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                port,
                state: SerialState::Idle,
            })),
            slot: Slot::new(),
            completion,
            arbiter,
            scheduler,
        }
    }

    /// Resets the transmit state and marks the channel available.
    pub fn open(&self) {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            inner.port.disable_interrupt(SerialCondition::BufferEmpty);
            inner.port.disable_interrupt(SerialCondition::TransmitComplete);
            inner.state = SerialState::Idle;
        });
        self.slot.open();
    }

    /// Queues `payload`, waiting for any transmission already in flight.
    ///
    /// Empty and oversize payloads are rejected before the channel is claimed.
    pub fn start(&self, payload: &[u8]) -> Result<(), SerialFault> {
        if payload.is_empty() {
            return Err(SerialFault::EmptyPayload);
        }
        let payload =
            Payload::from_slice(payload).map_err(|_| SerialFault::PayloadTooLong(payload.len()))?;

        self.slot.acquire();
        let started = critical_section::with(|cs| {
            self.arbiter.block(SERIAL_SLEEP_BLOCK)?;
            let mut inner = self.inner.borrow_ref_mut(cs);
            inner.state = SerialState::WriteData { payload, cursor: 0 };
            inner.port.enable_interrupt(SerialCondition::BufferEmpty);
            Ok(())
        });
        if started.is_err() {
            self.slot.release();
        }
        started
    }

    /// Sends `text` as raw bytes.
    pub fn transmit(&self, text: &str) -> Result<(), SerialFault> {
        self.start(text.as_bytes())
    }

    /// Services the channel interrupt.
    pub fn on_interrupt(&self) -> Result<(), SerialFault> {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let pending = inner.port.take_pending();
            for condition in pending.iter() {
                self.step(&mut inner, condition)?;
            }
            Ok(())
        })
    }

    /// Applies a single condition, as if the port had raised it.
    pub fn handle(&self, condition: SerialCondition) -> Result<(), SerialFault> {
        critical_section::with(|cs| self.step(&mut self.inner.borrow_ref_mut(cs), condition))
    }

    fn step(&self, inner: &mut Inner<P>, condition: SerialCondition) -> Result<(), SerialFault> {
        let Inner { port, state } = inner;
        let next = match (&mut *state, condition) {
            (SerialState::WriteData { payload, cursor }, SerialCondition::BufferEmpty) => {
                if let Some(&byte) = payload.get(*cursor) {
                    port.write(byte);
                    *cursor += 1;
                }
                if *cursor < payload.len() {
                    return Ok(());
                }
                port.disable_interrupt(SerialCondition::BufferEmpty);
                port.enable_interrupt(SerialCondition::TransmitComplete);
                SerialState::Stop
            }
            (SerialState::Stop, SerialCondition::TransmitComplete) => {
                self.arbiter.unblock(SERIAL_SLEEP_BLOCK)?;
                port.disable_interrupt(SerialCondition::TransmitComplete);
                self.slot.release();
                if let Some(event) = self.completion {
                    self.scheduler.post(event);
                }
                SerialState::Idle
            }
            (current, condition) => {
                return Err(SerialFault::ProtocolViolation {
                    phase: current.phase(),
                    condition,
                });
            }
        };
        *state = next;
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        self.slot.is_available()
    }

    /// Spins until the in-flight transmission (if any) completes.
    pub fn wait_until_available(&self) {
        while !self.is_available() {
            core::hint::spin_loop();
        }
    }

    pub fn phase(&self) -> SerialPhase {
        critical_section::with(|cs| self.inner.borrow_ref(cs).state.phase())
    }

    /// Runs `f` against the port with interrupts masked.
    pub fn with_port<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs).port))
    }
}
