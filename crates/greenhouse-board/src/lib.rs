//! Peripheral drivers for the greenhouse controller.
//!
//! This crate provides:
//! - [`sim`] an in-memory board with a manually advanced clock
//! - [`host`] system clock, host network probe, sysfs pressure input, logging valve
//! - [`sntp`] a non-blocking SNTP client implementing `TimeSource`
//! - [`mqtt`] an MQTT transport over `rumqttc`
//! - [`filter`] the scalar Kalman filter used on raw pressure samples

pub mod filter;
pub mod host;
pub mod mqtt;
pub mod sntp;

#[cfg(feature = "simulated")]
pub mod sim;

pub use filter::*;
pub use host::*;
pub use mqtt::*;
pub use sntp::*;

#[cfg(feature = "simulated")]
pub use sim::*;
