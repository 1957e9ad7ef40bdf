//! Si1133 ambient light sensor.
//!
//! The sensor is driven through its command register: parameters are staged
//! in `INPUT0` and committed with `PARAM_SET`, and every accepted command
//! bumps a 4-bit counter in `RESPONSE0` that bring-up checks.

mod registers;

pub use registers::*;

use core::fmt;

use crate::bus::{BusController, BusEngine, BusFault, RegisterDevice};
use crate::config::SI1133_ADDRESS;
use crate::scheduler::Event;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorError {
    Bus(BusFault),
    /// The command counter did not advance as expected after a parameter write.
    CommandCounter { expected: u8, actual: u8 },
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::Bus(err) => write!(f, "{err}"),
            SensorError::CommandCounter { expected, actual } => {
                write!(f, "command counter {actual}, expected {expected}")
            }
        }
    }
}

impl From<BusFault> for SensorError {
    fn from(err: BusFault) -> Self {
        SensorError::Bus(err)
    }
}

/// Si1133 on a dedicated bus engine.
pub struct Si1133<'a, C> {
    device: RegisterDevice<'a, C>,
}

impl<'a, C> Si1133<'a, C>
where
    C: BusController,
{
    pub const fn new(engine: &'a BusEngine<'a, C>) -> Self {
        Self {
            device: RegisterDevice::new(engine, SI1133_ADDRESS),
        }
    }

    /// Selects the white photodiode on channel 0.
    ///
    /// Blocks on each transaction; the bus interrupt must be live.
    pub fn configure(&self) -> Result<(), SensorError> {
        self.device.write_blocking(1, COMMAND, u32::from(CMD_RESET_CMD_CTR))?;
        let base = self.command_counter()?;

        self.device.write_blocking(1, INPUT0, u32::from(ADC_MUX_WHITE))?;
        self.device
            .write_blocking(1, COMMAND, u32::from(CMD_PARAM_SET | PARAM_ADC_CONFIG0))?;
        self.expect_counter(base.wrapping_add(1))?;

        self.device.write_blocking(1, INPUT0, u32::from(CHAN_LIST_CHANNEL0))?;
        self.device
            .write_blocking(1, COMMAND, u32::from(CMD_PARAM_SET | PARAM_CHAN_LIST))?;
        self.expect_counter(base.wrapping_add(2))
    }

    /// Starts a forced conversion on the configured channels.
    pub fn force_sense(&self) -> Result<(), BusFault> {
        self.device.write(1, COMMAND, u32::from(CMD_FORCE), None)
    }

    /// Reads the 16-bit conversion result; `completion` fires when it lands.
    pub fn request_result(&self, completion: Option<Event>) -> Result<(), BusFault> {
        self.device.read(2, HOSTOUT0, completion)
    }

    /// Result of the last completed read.
    pub fn result(&self) -> u32 {
        self.device.last_read()
    }

    /// Reads the part identifier (blocking).
    pub fn part_id(&self) -> Result<u8, BusFault> {
        let id = self.device.read_blocking(1, PART_ID)?;
        Ok(id.to_le_bytes()[0])
    }

    pub fn device(&self) -> &RegisterDevice<'a, C> {
        &self.device
    }

    fn command_counter(&self) -> Result<u8, SensorError> {
        let response = self.device.read_blocking(1, RESPONSE0)?;
        Ok(response.to_le_bytes()[0] & RESPONSE0_CMD_CTR_MASK)
    }

    fn expect_counter(&self, expected: u8) -> Result<(), SensorError> {
        let expected = expected & RESPONSE0_CMD_CTR_MASK;
        let actual = self.command_counter()?;
        if actual == expected {
            Ok(())
        } else {
            Err(SensorError::CommandCounter { expected, actual })
        }
    }
}
