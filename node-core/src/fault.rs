//! Aggregate error type for the control core.
//!
//! Every variant is unrecoverable on the device: the firmware halts with the
//! fault logged. Host code inspects the variant instead.

use core::fmt;

use crate::bus::BusFault;
use crate::sensor::SensorError;
use crate::serial::SerialFault;
use crate::sleep::VoteError;
use crate::timer::TimerError;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fault {
    Vote(VoteError),
    Bus(BusFault),
    Serial(SerialFault),
    Sensor(SensorError),
    Timer(TimerError),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Vote(err) => write!(f, "sleep arbiter: {err}"),
            Fault::Bus(err) => write!(f, "bus: {err}"),
            Fault::Serial(err) => write!(f, "serial: {err}"),
            Fault::Sensor(err) => write!(f, "sensor: {err}"),
            Fault::Timer(err) => write!(f, "timer: {err}"),
        }
    }
}

impl From<VoteError> for Fault {
    fn from(err: VoteError) -> Self {
        Fault::Vote(err)
    }
}

impl From<BusFault> for Fault {
    fn from(err: BusFault) -> Self {
        Fault::Bus(err)
    }
}

impl From<SerialFault> for Fault {
    fn from(err: SerialFault) -> Self {
        Fault::Serial(err)
    }
}

impl From<SensorError> for Fault {
    fn from(err: SensorError) -> Self {
        Fault::Sensor(err)
    }
}

impl From<TimerError> for Fault {
    fn from(err: TimerError) -> Self {
        Fault::Timer(err)
    }
}
