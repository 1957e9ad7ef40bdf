//! Light-sensor application: boot sequence and event handlers.

use core::fmt::Write as _;

use heapless::String;

use crate::bus::{BusController, BusEngine};
use crate::config::{BOOT_BANNER, LIGHT_THRESHOLD, MESSAGE_CAPACITY, SYSTEM_SLEEP_BLOCK};
use crate::fault::Fault;
use crate::scheduler::{Event, EventHandler, EventScheduler};
use crate::sensor::Si1133;
use crate::serial::{SerialEngine, SerialFault, SerialPort};
use crate::sleep::EnergyArbiter;
use crate::timer::{PeriodicTimer, TimerConfig, TimerDriver};

/// Status light driven by the light level.
pub trait Indicator {
    fn set(&mut self, on: bool);
}

/// Shared singletons the application drives.
pub struct Peripherals<'a, C, P, T> {
    pub scheduler: &'a EventScheduler,
    pub arbiter: &'a EnergyArbiter,
    pub bus: &'a BusEngine<'a, C>,
    pub serial: &'a SerialEngine<'a, P>,
    pub timer: &'a TimerDriver<'a, T>,
}

/// Classification of one light reading.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LightLevel {
    Dark(u32),
    Light(u32),
}

impl LightLevel {
    pub const fn classify(reading: u32) -> Self {
        if reading < LIGHT_THRESHOLD {
            LightLevel::Dark(reading)
        } else {
            LightLevel::Light(reading)
        }
    }

    /// Line reported over the serial link.
    pub fn message(self) -> Result<String<MESSAGE_CAPACITY>, SerialFault> {
        let mut line = String::new();
        let written = match self {
            LightLevel::Dark(value) => write!(line, "It's dark = {value}"),
            LightLevel::Light(value) => write!(line, "It's light outside = {value}"),
        };
        written.map_err(|_| SerialFault::PayloadTooLong(MESSAGE_CAPACITY))?;
        Ok(line)
    }
}

pub struct Application<'a, C, P, T, L> {
    peripherals: Peripherals<'a, C, P, T>,
    sensor: Si1133<'a, C>,
    indicator: L,
    timer_config: TimerConfig,
    last_level: Option<LightLevel>,
}

impl<'a, C, P, T, L> Application<'a, C, P, T, L>
where
    C: BusController,
    P: SerialPort,
    T: PeriodicTimer,
    L: Indicator,
{
    pub fn new(peripherals: Peripherals<'a, C, P, T>, indicator: L) -> Self {
        let sensor = Si1133::new(peripherals.bus);
        Self {
            peripherals,
            sensor,
            indicator,
            timer_config: TimerConfig::new(),
            last_level: None,
        }
    }

    #[must_use]
    pub fn with_timer_config(mut self, config: TimerConfig) -> Self {
        self.timer_config = config;
        self
    }

    /// Brings every peripheral up and queues the boot event.
    ///
    /// The scheduler and arbiter are reset first so nothing an interrupt posts
    /// during bring-up is lost. The bus interrupt must already be routed:
    /// sensor configuration waits on it.
    pub fn boot(&mut self) -> Result<(), Fault> {
        let p = &self.peripherals;
        p.scheduler.open();
        p.arbiter.open();
        p.bus.open();
        self.indicator.set(false);
        self.sensor.configure()?;
        p.serial.open();
        p.arbiter.block(SYSTEM_SLEEP_BLOCK)?;
        p.timer.open(self.timer_config)?;
        p.scheduler.post(Event::Boot);
        Ok(())
    }

    pub fn sensor(&self) -> &Si1133<'a, C> {
        &self.sensor
    }

    pub fn indicator(&self) -> &L {
        &self.indicator
    }

    /// Most recent classified reading.
    pub fn last_level(&self) -> Option<LightLevel> {
        self.last_level
    }

    fn on_read_complete(&mut self) -> Result<(), Fault> {
        let level = LightLevel::classify(self.sensor.result());
        self.indicator.set(matches!(level, LightLevel::Dark(_)));
        self.last_level = Some(level);
        self.peripherals.serial.transmit(&level.message()?)?;
        Ok(())
    }
}

impl<C, P, T, L> EventHandler for Application<'_, C, P, T, L>
where
    C: BusController,
    P: SerialPort,
    T: PeriodicTimer,
    L: Indicator,
{
    fn handle(&mut self, event: Event) -> Result<(), Fault> {
        match event {
            Event::TimerCompareA | Event::SerialTxComplete => {}
            Event::TimerCompareB => self.sensor.force_sense()?,
            Event::TimerUnderflow => self
                .sensor
                .request_result(Some(Event::SensorReadComplete))?,
            Event::SensorReadComplete => self.on_read_complete()?,
            Event::Boot => {
                self.peripherals.serial.transmit(BOOT_BANNER)?;
                self.peripherals.timer.start(true)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_splits_dark_from_light() {
        assert_eq!(LightLevel::classify(0), LightLevel::Dark(0));
        assert_eq!(LightLevel::classify(19), LightLevel::Dark(19));
        assert_eq!(LightLevel::classify(20), LightLevel::Light(20));
    }

    #[test]
    fn messages_match_serial_report_format() {
        assert_eq!(LightLevel::Dark(7).message().unwrap().as_str(), "It's dark = 7");
        assert_eq!(
            LightLevel::Light(u32::MAX).message().unwrap().as_str(),
            "It's light outside = 4294967295"
        );
    }
}
