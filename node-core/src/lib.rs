#![no_std]

// Control core for the light-sensor node.
//
// Everything here stays portable between the EFM32 firmware and host tooling:
// hardware is reached through the small traits each module defines, and all
// state shared with interrupt handlers lives behind `critical-section` cells.

pub mod app;
pub mod bus;
pub mod config;
pub mod fault;
pub mod scheduler;
pub mod sensor;
pub mod serial;
pub mod sleep;
pub mod slot;
pub mod timer;
