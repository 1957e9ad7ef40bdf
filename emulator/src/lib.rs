//! Host emulator for the sensor node: the control core running against
//! simulated peripherals behind a line-oriented prompt.

pub mod command;
pub mod hardware;
pub mod session;
