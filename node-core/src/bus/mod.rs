//! Interrupt-driven two-wire bus transactions.
//!
//! A [`BusEngine`] owns one controller and runs a register-addressed read or
//! write to completion from the controller's interrupt. The hardware is reached
//! through [`BusController`]; the firmware implements it over the EFM32 I2C
//! registers and the emulator over a simulated sensor.

mod device;
mod engine;

pub use device::RegisterDevice;
pub use engine::{BusEngine, BusPhase, BusState, Transfer};

use core::fmt;
use core::ops::BitOr;

use crate::scheduler::Event;
use crate::sleep::VoteError;

/// Largest word a single transaction moves.
pub const MAX_TRANSFER_BYTES: u8 = 4;

/// Controller command bits. Values match the EFM32 `I2C_CMD` register.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusCommand(u8);

impl BusCommand {
    pub const START: Self = Self(0x01);
    pub const STOP: Self = Self(0x02);
    pub const ACK: Self = Self(0x04);
    pub const NACK: Self = Self(0x08);
    pub const ABORT: Self = Self(0x20);
    pub const CLEAR_TX: Self = Self(0x40);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

impl BitOr for BusCommand {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Interrupt conditions that advance a transaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusCondition {
    /// The addressed device acknowledged the last byte.
    Ack,
    /// A byte is waiting in the receive buffer.
    DataReceived,
    /// The STOP condition finished on the wire.
    Stop,
}

impl BusCondition {
    const fn bit(self) -> u8 {
        match self {
            BusCondition::Ack => 0x01,
            BusCondition::DataReceived => 0x02,
            BusCondition::Stop => 0x04,
        }
    }
}

/// Set of pending [`BusCondition`]s, serviced ack first, then data, then stop.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusConditions(u8);

impl BusConditions {
    pub const NONE: Self = Self(0);

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, condition: BusCondition) -> bool {
        self.0 & condition.bit() != 0
    }

    #[must_use]
    pub const fn with(self, condition: BusCondition) -> Self {
        Self(self.0 | condition.bit())
    }

    /// Iterates the pending conditions in service order.
    pub fn iter(self) -> impl Iterator<Item = BusCondition> {
        [
            BusCondition::Ack,
            BusCondition::DataReceived,
            BusCondition::Stop,
        ]
        .into_iter()
        .filter(move |condition| self.contains(*condition))
    }
}

impl From<BusCondition> for BusConditions {
    fn from(condition: BusCondition) -> Self {
        Self(condition.bit())
    }
}

/// Transfer direction of the data phase.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Write,
    Read,
}

/// Parameters of one register-addressed transaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusRequest {
    pub direction: Direction,
    /// Outgoing word for writes; ignored for reads.
    pub word: u32,
    /// Bytes in the data phase, 1..=4.
    pub byte_count: u8,
    /// 7-bit device address.
    pub device_address: u8,
    pub register_address: u8,
    /// Posted once the STOP completes.
    pub completion: Option<Event>,
}

impl BusRequest {
    /// Read `byte_count` bytes starting at `register_address`.
    pub const fn read(device_address: u8, register_address: u8, byte_count: u8) -> Self {
        Self {
            direction: Direction::Read,
            word: 0,
            byte_count,
            device_address,
            register_address,
            completion: None,
        }
    }

    /// Write the low `byte_count` bytes of `word`, most significant first.
    pub const fn write(device_address: u8, register_address: u8, word: u32, byte_count: u8) -> Self {
        Self {
            direction: Direction::Write,
            word,
            byte_count,
            device_address,
            register_address,
            completion: None,
        }
    }

    #[must_use]
    pub const fn with_completion(mut self, completion: Option<Event>) -> Self {
        self.completion = completion;
        self
    }

    /// Address byte sent after the first START.
    pub const fn write_address(&self) -> u8 {
        self.device_address << 1
    }

    /// Address byte sent after the repeated START.
    pub const fn read_address(&self) -> u8 {
        (self.device_address << 1) | 1
    }
}

/// Register-level access to one bus controller.
///
/// All methods are called with interrupts masked.
pub trait BusController {
    /// Writes `command` to the controller command register.
    fn command(&mut self, command: BusCommand);

    /// Loads the next byte into the transmit buffer.
    fn transmit(&mut self, byte: u8);

    /// Pops the received byte.
    fn receive(&mut self) -> u8;

    /// Returns `true` when the controller state machine is idle.
    fn is_idle(&self) -> bool;

    /// Returns the raw interrupt-enable mask.
    fn interrupt_mask(&self) -> u32;

    /// Replaces the raw interrupt-enable mask.
    fn set_interrupt_mask(&mut self, mask: u32);

    /// Clears every pending interrupt flag.
    fn clear_flags(&mut self);

    /// Returns `true` once a STOP condition has completed, regardless of the
    /// interrupt-enable mask.
    fn stop_detected(&self) -> bool;

    /// Returns and clears the enabled, pending conditions.
    fn take_pending(&mut self) -> BusConditions;
}

/// Fatal bus engine errors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusFault {
    /// `condition` arrived while the engine was in `phase`.
    ProtocolViolation {
        phase: BusPhase,
        condition: BusCondition,
    },
    /// The controller was not idle when a transaction was started.
    NotIdle,
    /// The byte count is outside 1..=4.
    InvalidLength(u8),
    Vote(VoteError),
}

impl fmt::Display for BusFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusFault::ProtocolViolation { phase, condition } => {
                write!(f, "unexpected {condition:?} in {phase:?}")
            }
            BusFault::NotIdle => f.write_str("controller busy at start"),
            BusFault::InvalidLength(count) => write!(f, "invalid byte count {count}"),
            BusFault::Vote(err) => write!(f, "{err}"),
        }
    }
}

impl From<VoteError> for BusFault {
    fn from(err: VoteError) -> Self {
        BusFault::Vote(err)
    }
}
