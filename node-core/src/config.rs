//! Board-level configuration shared by the firmware and the emulator.

use core::time::Duration;

use crate::sleep::EnergyMode;

/// Depth the bus engine forbids while a transaction is in flight.
pub const BUS_SLEEP_BLOCK: EnergyMode = EnergyMode::Em2;

/// Depth the serial engine forbids while a transmission is in flight.
pub const SERIAL_SLEEP_BLOCK: EnergyMode = EnergyMode::Em3;

/// Depth the periodic timer forbids while it is counting.
pub const TIMER_SLEEP_BLOCK: EnergyMode = EnergyMode::Em4;

/// Depth the application forbids for its whole lifetime.
pub const SYSTEM_SLEEP_BLOCK: EnergyMode = EnergyMode::Em3;

/// Low-frequency timer clock after prescaling.
pub const TIMER_CLOCK_HZ: u32 = 1_000;

/// Full PWM period of the measurement timer.
pub const PWM_PERIOD: Duration = Duration::from_secs(1);

/// Active (high) portion of the PWM period.
pub const PWM_ACTIVE_PERIOD: Duration = Duration::from_millis(2);

/// 7-bit bus address of the Si1133 light sensor.
pub const SI1133_ADDRESS: u8 = 0x55;

/// Readings below this count are reported as dark.
pub const LIGHT_THRESHOLD: u32 = 20;

/// Largest serial payload accepted by a single transmission.
pub const SERIAL_PAYLOAD_CAPACITY: usize = 80;

/// Capacity of formatted status messages.
pub const MESSAGE_CAPACITY: usize = 60;

/// Banner sent over the serial link once boot completes.
pub const BOOT_BANNER: &str = "Hello World";
